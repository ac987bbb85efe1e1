//! Kernel OOM-kill exporter library
//!
//! This crate provides the core functionality for:
//! - Extracting pod and container identifiers from kernel OOM-kill lines
//! - Resolving them to workload labels through the container runtime
//! - Counting kills per workload in a Prometheus registry
//! - Reading the kernel log, health tracking and the metrics endpoint

pub mod aggregate;
pub mod api;
pub mod extract;
pub mod health;
pub mod kmsg;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod resolve;
pub mod runtime;

pub use aggregate::{LabelSchema, OomKillCounter};
pub use extract::{Extractor, ExtractorConfig};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use pipeline::{LineOutcome, Pipeline, PipelineStats};
pub use resolve::{ResolveError, Resolver};
pub use runtime::{ContainerRuntime, DockerClient, InMemoryRuntime, RuntimeError};
