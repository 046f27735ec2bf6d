//! Dependency ordering for orchestration batches.
//!
//! Builds a directed graph from each container's declared `depends_on` list
//! and derives a dependency-first topological order (Kahn's algorithm over
//! BTree collections, so ties break deterministically by name). Containers
//! caught in a cycle — or stranded behind one — are excluded with a recorded
//! issue; the rest of the batch proceeds.

use std::collections::{BTreeMap, BTreeSet};

use tug_common::types::ContainerId;

/// Why containers were excluded from an ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingIssue {
    /// Containers that could not be ordered.
    pub members: Vec<ContainerId>,
    pub message: String,
}

/// Result of ordering one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOrder {
    /// Dependency-first apply order.
    pub order: Vec<ContainerId>,
    /// Containers excluded because of a cycle (or a dependency on one).
    pub excluded: Vec<ContainerId>,
    pub issues: Vec<OrderingIssue>,
}

/// Order a batch so every container's in-batch dependencies come before it.
///
/// Dependencies outside the batch have no update to apply and are presumed
/// healthy, so only edges between batch members constrain the order.
pub fn order_batch(batch: &[(ContainerId, Vec<ContainerId>)]) -> BatchOrder {
    let members: BTreeSet<ContainerId> = batch.iter().map(|(id, _)| id.clone()).collect();

    let mut indegree: BTreeMap<ContainerId, usize> =
        members.iter().cloned().map(|id| (id, 0)).collect();
    let mut dependents: BTreeMap<ContainerId, BTreeSet<ContainerId>> = BTreeMap::new();

    for (id, depends_on) in batch {
        for dep in depends_on {
            if !members.contains(dep) || dep == id {
                continue;
            }
            // Edge dep -> id: the dependency applies first.
            if dependents.entry(dep.clone()).or_default().insert(id.clone()) {
                *indegree.entry(id.clone()).or_default() += 1;
            }
        }
    }

    let mut ready: BTreeSet<ContainerId> = indegree
        .iter()
        .filter_map(|(id, degree)| (*degree == 0).then(|| id.clone()))
        .collect();

    let mut order = Vec::with_capacity(members.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        if let Some(children) = dependents.get(&id) {
            for child in children.clone() {
                let Some(degree) = indegree.get_mut(&child) else {
                    continue;
                };
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    let ordered: BTreeSet<ContainerId> = order.iter().cloned().collect();
    let excluded: Vec<ContainerId> = members.difference(&ordered).cloned().collect();

    let mut result = BatchOrder {
        order,
        excluded: excluded.clone(),
        issues: Vec::new(),
    };
    if !excluded.is_empty() {
        let names: Vec<String> = excluded.iter().map(|id| id.to_string()).collect();
        result.issues.push(OrderingIssue {
            members: excluded,
            message: format!("dependency cycle involving: {}", names.join(", ")),
        });
    }
    result
}
