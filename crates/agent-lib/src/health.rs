//! Liveness and readiness tracking for the exporter
//!
//! The pipeline reports on its two collaborators: the kernel log source and
//! the container runtime. A closed log source is unhealthy (the exporter
//! will not count anything until restarted); runtime failures only degrade.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    pub const KMSG_SOURCE: &str = "kmsg_source";
    pub const RUNTIME: &str = "runtime";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still working, but recent operations failed
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures reported since the component was last healthy
    pub consecutive_failures: u32,
    /// Unix timestamp of the last status report
    pub updated_at: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared health registry; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.state.write().await.components.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Healthy, None, 0),
        );
    }

    pub async fn report_success(&self, name: &str) {
        let mut state = self.state.write().await;
        // Skip the write when nothing changes; this runs once per resolved kill
        if let Some(current) = state.components.get(name) {
            if current.status == ComponentStatus::Healthy {
                return;
            }
        }
        state.components.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Healthy, None, 0),
        );
    }

    /// Record a transient failure; the component becomes degraded
    pub async fn report_failure(&self, name: &str, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(name)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
            .saturating_add(1);
        state.components.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Degraded, Some(message.into()), failures),
        );
    }

    /// Mark a component as permanently failed
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(name)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0);
        state.components.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Unhealthy, Some(message.into()), failures),
        );
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.state.read().await.components.get(name).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max_by_key(|s| match s {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = self.state.read().await.ready;
        if !ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Exporter not yet initialized".to_string()),
            };
        }

        if self.health().await.status == ComponentStatus::Unhealthy {
            return ReadinessResponse {
                ready: false,
                reason: Some("Component unhealthy".to_string()),
            };
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_runtime_failures_degrade_then_recover() {
        let registry = HealthRegistry::new();
        registry.register(components::RUNTIME).await;

        registry
            .report_failure(components::RUNTIME, "connection refused")
            .await;
        registry.report_failure(components::RUNTIME, "timeout").await;

        let runtime = registry.component(components::RUNTIME).await.unwrap();
        assert_eq!(runtime.status, ComponentStatus::Degraded);
        assert_eq!(runtime.consecutive_failures, 2);
        assert_eq!(runtime.message.as_deref(), Some("timeout"));
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.report_success(components::RUNTIME).await;
        let runtime = registry.component(components::RUNTIME).await.unwrap();
        assert_eq!(runtime.status, ComponentStatus::Healthy);
        assert_eq!(runtime.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_unhealthy_dominates() {
        let registry = HealthRegistry::new();
        registry.register(components::RUNTIME).await;
        registry.register(components::KMSG_SOURCE).await;

        registry.report_failure(components::RUNTIME, "timeout").await;
        registry
            .set_unhealthy(components::KMSG_SOURCE, "log source closed")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::KMSG_SOURCE).await;
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::KMSG_SOURCE, "log source closed")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Component unhealthy"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ComponentStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
