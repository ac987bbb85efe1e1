//! Core data models for the OOM-kill pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Runtime label carrying the Kubernetes pod UID
pub const POD_UID_LABEL: &str = "io.kubernetes.pod.uid";

/// Runtime label distinguishing workload containers from pod sandboxes
pub const CONTAINER_TYPE_LABEL: &str = "io.kubernetes.docker.type";

/// A single record read from the kernel log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub message: String,
    /// Kernel sequence number, when the source provides one
    pub sequence: Option<u64>,
    /// Microseconds since boot, when the source provides them
    pub timestamp_us: Option<u64>,
}

impl LogLine {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sequence: None,
            timestamp_us: None,
        }
    }
}

/// Identifiers pulled out of an OOM-kill log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KillMatch {
    /// Only the pod UID could be extracted; resolution has to search by label
    PodOnly { pod_uid: String },
    /// The container ID was extracted directly from the cgroup path
    PodAndContainer {
        pod_uid: String,
        container_id: String,
    },
}

impl KillMatch {
    pub fn pod_uid(&self) -> &str {
        match self {
            KillMatch::PodOnly { pod_uid } => pod_uid,
            KillMatch::PodAndContainer { pod_uid, .. } => pod_uid,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match self {
            KillMatch::PodOnly { .. } => None,
            KillMatch::PodAndContainer { container_id, .. } => Some(container_id),
        }
    }

    /// Short name of the extraction strategy that produced this match
    pub fn strategy(&self) -> &'static str {
        match self {
            KillMatch::PodOnly { .. } => "pod_only",
            KillMatch::PodAndContainer { .. } => "pod_and_container",
        }
    }
}

impl fmt::Display for KillMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillMatch::PodOnly { pod_uid } => write!(f, "pod {}", pod_uid),
            KillMatch::PodAndContainer {
                pod_uid,
                container_id,
            } => write!(f, "container {} (pod {})", container_id, pod_uid),
        }
    }
}

/// Descriptive labels for the container an OOM kill was attributed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadMetadata {
    pub container_id: String,
    pub labels: HashMap<String, String>,
}

impl WorkloadMetadata {
    pub fn new(container_id: impl Into<String>, labels: HashMap<String, String>) -> Self {
        Self {
            container_id: container_id.into(),
            labels,
        }
    }

    /// Label value, or the empty string when the runtime did not set it
    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Container summary as returned by a filtered runtime listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub labels: HashMap<String, String>,
}

impl From<ContainerSummary> for WorkloadMetadata {
    fn from(summary: ContainerSummary) -> Self {
        WorkloadMetadata::new(summary.id, summary.labels)
    }
}

/// Exact label key/value pair used to filter a container listing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelFilter {
    pub key: String,
    pub value: String,
}

impl LabelFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}
