//! Dependency ordering of managed objects.

use indexmap::IndexSet;
use std::hash::Hash;

/// A dependency cycle, members in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicDependency<K> {
    /// Members of the cycle
    pub cycle: Vec<K>,
}

/// Order `roots` and everything they transitively depend on so that every
/// key follows all of its dependencies.
///
/// Roots keep their relative order wherever the dependencies allow it.
///
/// # Errors
///
/// Returns the first cycle found
pub fn order_dependencies<K, F, I>(roots: &[K], dependencies: F) -> Result<Vec<K>, CyclicDependency<K>>
where
    K: Clone + Eq + Hash,
    F: Fn(&K) -> I,
    I: IntoIterator<Item = K>,
{
    let mut ordered = IndexSet::new();
    let mut guard = IndexSet::new();

    for root in roots {
        visit(root, &dependencies, &mut guard, &mut ordered)?;
    }

    Ok(ordered.into_iter().collect())
}

fn visit<K, F, I>(
    key: &K,
    dependencies: &F,
    guard: &mut IndexSet<K>,
    ordered: &mut IndexSet<K>,
) -> Result<(), CyclicDependency<K>>
where
    K: Clone + Eq + Hash,
    F: Fn(&K) -> I,
    I: IntoIterator<Item = K>,
{
    if ordered.contains(key) {
        return Ok(());
    }
    if let Some(start) = guard.get_index_of(key) {
        return Err(CyclicDependency {
            cycle: guard.iter().skip(start).cloned().collect(),
        });
    }

    guard.insert(key.clone());
    for dependency in dependencies(key) {
        visit(&dependency, dependencies, guard, ordered)?;
    }
    guard.pop();

    ordered.insert(key.clone());
    Ok(())
}
