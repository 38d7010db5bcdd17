//! Teams: named execution contexts for jobs.
//!
//! Every function stage, governance callback, thread completion and recycle
//! task reaches a thread through a [`Team`] as an explicit [`Command`].
//!
//! - [`PassiveTeam`] runs the command on the submitting thread. A per-thread
//!   trampoline queues nested submissions so hopping between passive stages
//!   never grows the stack.
//! - [`LeaderFollowerTeam`] owns a fixed set of workers. One worker at a time
//!   is the leader: it waits for the next command, takes it, hands leadership
//!   to a follower and then executes outside the lock.

use crate::config::KernelConfig;
use crate::executor::Command;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Team error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TeamError {
    /// Team no longer accepts work
    #[error("Team {team} is stopped")]
    Stopped {
        /// Team name
        team: String,
    },
    /// Worker thread could not be started
    #[error("Failed to start team {team}: {message}")]
    Spawn {
        /// Team name
        team: String,
        /// OS error
        message: String,
    },
}

/// A named execution context
pub trait Team: Send + Sync {
    /// Team name
    fn name(&self) -> &str;

    /// Hand a command to the team.
    ///
    /// # Errors
    ///
    /// Returns [`TeamError::Stopped`] once the team is stopped. The rejected
    /// command has already been abandoned: function jobs fail their thread
    /// and recycle tasks run on the caller.
    fn submit(&self, command: Command) -> Result<(), TeamError>;

    /// Stop accepting commands. Queued commands still run.
    fn stop(&self);

    /// Check if stopped
    fn is_stopped(&self) -> bool;
}

fn reject(team: &str, command: Command) -> TeamError {
    let error = TeamError::Stopped {
        team: team.to_string(),
    };
    tracing::warn!(team, command = command.kind(), "command rejected by stopped team");
    command.abandon(&error);
    error
}

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<Command>>> = const { RefCell::new(None) };
}

/// Clears the trampoline even if a command unwinds
struct TrampolineGuard;

impl Drop for TrampolineGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|trampoline| trampoline.borrow_mut().take());
    }
}

/// Runs commands on the submitting thread
#[derive(Debug)]
pub struct PassiveTeam {
    name: String,
    stopped: AtomicBool,
}

impl PassiveTeam {
    /// Create a passive team
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stopped: AtomicBool::new(false),
        }
    }
}

impl Team for PassiveTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, command: Command) -> Result<(), TeamError> {
        if self.is_stopped() {
            return Err(reject(&self.name, command));
        }

        let first = TRAMPOLINE.with(|trampoline| {
            let mut trampoline = trampoline.borrow_mut();
            match trampoline.as_mut() {
                Some(queue) => {
                    queue.push_back(command);
                    None
                }
                None => {
                    *trampoline = Some(VecDeque::new());
                    Some(command)
                }
            }
        });
        let Some(first) = first else {
            return Ok(());
        };

        let _guard = TrampolineGuard;
        let mut next = Some(first);
        while let Some(command) = next {
            command.run();
            next = TRAMPOLINE.with(|trampoline| {
                trampoline
                    .borrow_mut()
                    .as_mut()
                    .and_then(VecDeque::pop_front)
            });
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct QueueState {
    commands: VecDeque<Command>,
    has_leader: bool,
    stopping: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<QueueState>,
    /// Signalled when a command is queued or the team stops
    command_available: Condvar,
    /// Signalled when the leader hands over
    leader_vacant: Condvar,
}

impl Shared {
    /// Block until this worker leads and a command is available. `None`
    /// once the team is stopping and drained.
    fn next_command(&self) -> Option<Command> {
        let mut queue = self.queue.lock();

        while queue.has_leader && !(queue.stopping && queue.commands.is_empty()) {
            self.leader_vacant.wait(&mut queue);
        }
        if queue.stopping && queue.commands.is_empty() {
            self.leader_vacant.notify_all();
            return None;
        }

        queue.has_leader = true;
        while queue.commands.is_empty() && !queue.stopping {
            self.command_available.wait(&mut queue);
        }
        let command = queue.commands.pop_front();
        queue.has_leader = false;
        self.leader_vacant.notify_one();

        if command.is_none() {
            self.leader_vacant.notify_all();
        }
        command
    }
}

/// Fixed pool of workers using the leader/follower pattern
pub struct LeaderFollowerTeam {
    name: String,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<std::thread::ThreadId>,
}

impl LeaderFollowerTeam {
    /// Start a team of `threads` workers
    ///
    /// # Errors
    ///
    /// Returns error if a worker thread can not be spawned
    pub fn start(
        name: impl Into<String>,
        threads: usize,
        config: &KernelConfig,
    ) -> Result<Self, TeamError> {
        let name = name.into();
        let shared = Arc::new(Shared::default());
        let threads = config.worker_threads(threads);

        let mut workers = Vec::with_capacity(threads);
        for worker in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}-{}", config.thread_name_prefix, name, worker))
                .spawn(move || Self::work(&worker_shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    Self::shutdown(&shared, workers);
                    return Err(TeamError::Spawn {
                        team: name,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(team = %name, threads, "team started");
        let worker_ids = workers.iter().map(|handle| handle.thread().id()).collect();
        Ok(Self {
            name,
            shared,
            workers: Mutex::new(workers),
            worker_ids,
        })
    }

    fn work(shared: &Shared) {
        while let Some(command) = shared.next_command() {
            let kind = command.kind();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| command.run()));
            if outcome.is_err() {
                tracing::error!(command = kind, "command panicked on worker");
            }
        }
    }

    fn shutdown(shared: &Shared, workers: Vec<JoinHandle<()>>) {
        {
            let mut queue = shared.queue.lock();
            queue.stopping = true;
        }
        shared.command_available.notify_all();
        shared.leader_vacant.notify_all();

        let current = std::thread::current().id();
        for worker in workers {
            // a worker stopping its own team must not join itself
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }

    /// Number of workers
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.worker_ids.len()
    }

    /// Commands waiting for a worker
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().commands.len()
    }

    /// Check if the calling thread is one of this team's workers
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        self.worker_ids.contains(&std::thread::current().id())
    }
}

impl Team for LeaderFollowerTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, command: Command) -> Result<(), TeamError> {
        {
            let mut queue = self.shared.queue.lock();
            if !queue.stopping {
                queue.commands.push_back(command);
                drop(queue);
                self.shared.command_available.notify_one();
                return Ok(());
            }
        }
        Err(reject(&self.name, command))
    }

    fn stop(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        tracing::debug!(team = %self.name, "stopping team");
        Self::shutdown(&self.shared, workers);
    }

    fn is_stopped(&self) -> bool {
        self.shared.queue.lock().stopping
    }
}

impl Drop for LeaderFollowerTeam {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LeaderFollowerTeam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderFollowerTeam")
            .field("name", &self.name)
            .field("threads", &self.worker_ids.len())
            .field("pending", &self.pending())
            .finish()
    }
}
