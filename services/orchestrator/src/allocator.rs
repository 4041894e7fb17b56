//! Worker index allocation.
//!
//! Worker indices are never stored. The set in use is re-derived from the
//! `worker-{n}` deployment names on every call, so allocation always
//! reflects what the control plane reports.

use std::collections::BTreeSet;

use fleet_naming::{parse_indexed_name, AppKind};
use rand::seq::IteratorRandom;
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::Orchestrator;

/// Indices carried by `worker-{n}` names; other names are skipped.
pub fn used_worker_indices<'a, I>(names: I) -> BTreeSet<u32>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = AppKind::Worker.prefix();
    names
        .into_iter()
        .filter_map(|name| parse_indexed_name(&prefix, name))
        .collect()
}

/// Smallest positive integer not in `used`.
pub fn lowest_unused_index(used: &BTreeSet<u32>) -> u32 {
    let mut candidate = 1;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

impl Orchestrator {
    /// Names of all worker deployments in `namespace`.
    pub async fn worker_names(&self, namespace: &str) -> OrchestratorResult<Vec<String>> {
        let prefix = AppKind::Worker.prefix();
        let deployments = self.control_plane.list_deployments(namespace).await?;

        Ok(deployments
            .into_iter()
            .map(|dp| dp.metadata.name)
            .filter(|name| name.starts_with(&prefix))
            .collect())
    }

    /// Number of worker deployments in `namespace`.
    pub async fn number_of_workers(&self, namespace: &str) -> OrchestratorResult<usize> {
        Ok(self.worker_names(namespace).await?.len())
    }

    /// Worker indices currently in use.
    pub async fn worker_indices(&self, namespace: &str) -> OrchestratorResult<BTreeSet<u32>> {
        let names = self.worker_names(namespace).await?;
        Ok(used_worker_indices(names.iter().map(String::as_str)))
    }

    /// Lowest worker index not in use.
    pub async fn next_worker_index(&self, namespace: &str) -> OrchestratorResult<u32> {
        let used = self.worker_indices(namespace).await?;
        let index = lowest_unused_index(&used);
        debug!(namespace, index, in_use = used.len(), "Allocated worker index");
        Ok(index)
    }

    /// A uniformly random worker index in use, if any worker exists.
    pub async fn random_existing_index(&self, namespace: &str) -> OrchestratorResult<Option<u32>> {
        let used = self.worker_indices(namespace).await?;
        Ok(used.into_iter().choose(&mut rand::rng()))
    }

    /// The caller's index, or a random existing worker when none was given.
    pub(crate) async fn resolve_worker_index(
        &self,
        namespace: &str,
        index: Option<u32>,
    ) -> OrchestratorResult<u32> {
        if let Some(index) = index {
            return Ok(index);
        }

        let picked = self
            .random_existing_index(namespace)
            .await?
            .ok_or_else(|| OrchestratorError::NoWorkers {
                namespace: namespace.to_string(),
            })?;
        debug!(namespace, index = picked, "Picked random worker");
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(indices: &[u32]) -> BTreeSet<u32> {
        indices.iter().copied().collect()
    }

    #[test]
    fn test_lowest_unused_index_examples() {
        assert_eq!(lowest_unused_index(&set(&[1, 2, 4])), 3);
        assert_eq!(lowest_unused_index(&set(&[])), 1);
        assert_eq!(lowest_unused_index(&set(&[1])), 2);
        assert_eq!(lowest_unused_index(&set(&[2, 3])), 1);
    }

    #[test]
    fn test_used_worker_indices_skips_foreign_names() {
        let names = ["worker-1", "worker-7", "worker-x", "bootstrap-2", "km", "worker"];
        assert_eq!(used_worker_indices(names), set(&[1, 7]));
    }

    proptest! {
        #[test]
        fn prop_lowest_unused_is_minimal_gap(used in proptest::collection::btree_set(1u32..64, 0..40)) {
            let index = lowest_unused_index(&used);
            prop_assert!(index >= 1);
            prop_assert!(!used.contains(&index));
            for smaller in 1..index {
                prop_assert!(used.contains(&smaller));
            }
        }
    }
}
