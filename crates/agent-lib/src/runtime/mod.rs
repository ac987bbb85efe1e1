//! Container runtime access
//!
//! The pipeline only needs two runtime operations: a label-filtered listing
//! and an inspection by container ID. [`ContainerRuntime`] captures exactly
//! those, so the Docker client can be swapped for another runtime or for the
//! in-memory implementation used in tests.

mod docker;
mod memory;

pub use docker::{DockerClient, DEFAULT_DOCKER_HOST};
pub use memory::InMemoryRuntime;

use crate::models::{ContainerSummary, LabelFilter, WorkloadMetadata};
use thiserror::Error;

pub use async_trait::async_trait;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime has no container with this ID
    #[error("container {0} not found")]
    NotFound(String),

    #[error("runtime request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("runtime transport error: {0}")]
    Transport(String),

    #[error("runtime returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid runtime response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unsupported runtime endpoint {0:?}")]
    UnsupportedEndpoint(String),
}

/// Narrow view of a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers carrying every one of the given labels
    async fn list_containers(
        &self,
        filters: &[LabelFilter],
    ) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Inspect a single container by ID
    async fn inspect_container(&self, container_id: &str)
        -> Result<WorkloadMetadata, RuntimeError>;
}
