//! Resolution of extracted identifiers into workload metadata

use crate::models::{KillMatch, LabelFilter, WorkloadMetadata, CONTAINER_TYPE_LABEL, POD_UID_LABEL};
use crate::runtime::{ContainerRuntime, RuntimeError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no container found")]
    NotFound,

    #[error("{count} containers matched, expected exactly one")]
    Ambiguous { count: usize },

    #[error(transparent)]
    Runtime(RuntimeError),
}

impl ResolveError {
    /// Stable reason label for metrics and logs
    pub fn reason(&self) -> &'static str {
        match self {
            ResolveError::NotFound => "not_found",
            ResolveError::Ambiguous { .. } => "ambiguous",
            ResolveError::Runtime(_) => "runtime_error",
        }
    }
}

impl From<RuntimeError> for ResolveError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NotFound(_) => ResolveError::NotFound,
            other => ResolveError::Runtime(other),
        }
    }
}

/// Looks up the container behind a kill match
#[derive(Clone)]
pub struct Resolver {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Resolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn resolve(&self, kill: &KillMatch) -> Result<WorkloadMetadata, ResolveError> {
        match kill {
            KillMatch::PodOnly { pod_uid } => self.resolve_pod(pod_uid).await,
            KillMatch::PodAndContainer { container_id, .. } => {
                self.resolve_container(container_id).await
            }
        }
    }

    /// Search for the single workload container labelled with this pod UID
    async fn resolve_pod(&self, pod_uid: &str) -> Result<WorkloadMetadata, ResolveError> {
        let filters = [
            LabelFilter::new(POD_UID_LABEL, normalize_pod_uid(pod_uid)),
            LabelFilter::new(CONTAINER_TYPE_LABEL, "container"),
        ];

        let mut containers = self.runtime.list_containers(&filters).await?;
        debug!(pod_uid = %pod_uid, matches = containers.len(), "Listed pod containers");

        match containers.len() {
            0 => Err(ResolveError::NotFound),
            1 => Ok(containers.remove(0).into()),
            count => Err(ResolveError::Ambiguous { count }),
        }
    }

    async fn resolve_container(&self, container_id: &str) -> Result<WorkloadMetadata, ResolveError> {
        let metadata = self.runtime.inspect_container(container_id).await?;
        debug!(container_id = %container_id, labels = metadata.labels.len(), "Inspected container");
        Ok(metadata)
    }
}

/// Systemd cgroup slices spell the pod UID with underscores instead of dashes
fn normalize_pod_uid(pod_uid: &str) -> String {
    pod_uid.replace('_', "-")
}
