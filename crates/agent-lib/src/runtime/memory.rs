//! In-process container runtime
//!
//! Holds a fixed set of containers and answers the same queries as the
//! Docker client. Used for tests and for running the pipeline without a
//! daemon.

use super::{async_trait, ContainerRuntime, RuntimeError};
use crate::models::{ContainerSummary, LabelFilter, WorkloadMetadata};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Container runtime backed by an in-memory table
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    containers: RwLock<Vec<ContainerSummary>>,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a container with the given labels
    pub fn add_container<I, K, V>(&self, id: impl Into<String>, labels: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let labels: HashMap<String, String> = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut containers = self.containers.write().unwrap_or_else(|e| e.into_inner());
        containers.push(ContainerSummary {
            id: id.into(),
            labels,
        });
    }

    /// Remove a container, as if it exited and was garbage collected
    pub fn remove_container(&self, id: &str) {
        let mut containers = self.containers.write().unwrap_or_else(|e| e.into_inner());
        containers.retain(|c| c.id != id);
    }

    /// Make every subsequent query fail with a transport error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of queries answered so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<(), RuntimeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Transport(
                "connect /var/run/docker.sock: connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn list_containers(
        &self,
        filters: &[LabelFilter],
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.begin_call()?;

        let containers = self.containers.read().unwrap_or_else(|e| e.into_inner());
        Ok(containers
            .iter()
            .filter(|c| {
                filters
                    .iter()
                    .all(|f| c.labels.get(&f.key).map(String::as_str) == Some(f.value.as_str()))
            })
            .cloned()
            .collect())
    }

    async fn inspect_container(
        &self,
        container_id: &str,
    ) -> Result<WorkloadMetadata, RuntimeError> {
        self.begin_call()?;

        let containers = self.containers.read().unwrap_or_else(|e| e.into_inner());
        containers
            .iter()
            .find(|c| c.id == container_id)
            .cloned()
            .map(WorkloadMetadata::from)
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))
    }
}
