//! OOM-kill signature extraction from kernel log lines
//!
//! Two extraction strategies are supported, selected by the shape of the
//! configured pattern:
//! - single-stage: one pattern with a `container_id` named group (and
//!   optionally `pod_uid`) captures both identifiers from the cgroup path
//! - two-stage: a coarse OOM test followed by a stricter pattern that pulls
//!   the pod UID out of the cgroup path

use crate::models::KillMatch;
use regex::{Captures, Regex};
use thiserror::Error;

/// Default single-stage pattern for `oom-kill:` lines carrying `task_memcg=`.
///
/// Covers the systemd cgroup driver
/// (`kubepods-burstable-pod<uid>.slice/docker-<id>.scope`) and cgroupfs
/// (`kubepods/burstable/pod<uid>/<id>`). A path that stops at the pod level
/// yields a pod-only match. The path is bounded by the `task_memcg=` field
/// and must contain a `kubepods` segment and a full pod UID.
pub const DEFAULT_PATTERN: &str = r"oom-kill.*task_memcg=[^,\s]*?kubepods[^,\s]*?[/-]pod(?P<pod_uid>[0-9a-fA-F]{8}[-_][0-9a-fA-F]{4}[-_][0-9a-fA-F]{4}[-_][0-9a-fA-F]{4}[-_][0-9a-fA-F]{12})(?:\.slice)?(?:/(?:[a-z\-]+-)?(?P<container_id>[0-9a-f]+)(?:\.scope)?)?";

/// Coarse test used by the two-stage strategy
pub const DEFAULT_OOM_MATCH_PATTERN: &str = ".*killed as a result of limit of.*";

/// Pod UID pattern for the legacy `Task in ... killed as a result of limit of` format
pub const LEGACY_POD_PATTERN: &str = r"^.+/pod(\w+\-\w+\-\w+\-\w+\-\w+)/.+$";

const POD_UID_GROUP: &str = "pod_uid";
const CONTAINER_ID_GROUP: &str = "container_id";

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern {pattern:?}: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern {0:?} has no capture group for the pod UID")]
    MissingPodGroup(String),
}

/// Patterns the extractor is built from
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Extraction pattern; its shape selects the strategy
    pub pattern: String,
    /// Coarse OOM test, only used by the two-stage strategy
    pub oom_match_pattern: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            oom_match_pattern: DEFAULT_OOM_MATCH_PATTERN.to_string(),
        }
    }
}

impl ExtractorConfig {
    /// Configuration for the legacy two-stage strategy
    pub fn legacy() -> Self {
        Self {
            pattern: LEGACY_POD_PATTERN.to_string(),
            oom_match_pattern: DEFAULT_OOM_MATCH_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    SingleStage { pattern: Regex },
    TwoStage { oom: Regex, pod: Regex },
}

/// Compiled extractor, built once at startup
#[derive(Debug, Clone)]
pub struct Extractor {
    strategy: Strategy,
}

impl Extractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, PatternError> {
        let pattern = compile(&config.pattern)?;

        let has_container_group = pattern
            .capture_names()
            .flatten()
            .any(|name| name == CONTAINER_ID_GROUP);

        let strategy = if has_container_group {
            Strategy::SingleStage { pattern }
        } else {
            // captures_len includes the implicit whole-match group
            if pattern.captures_len() < 2 {
                return Err(PatternError::MissingPodGroup(config.pattern.clone()));
            }
            Strategy::TwoStage {
                oom: compile(&config.oom_match_pattern)?,
                pod: pattern,
            }
        };

        Ok(Self { strategy })
    }

    /// Human-readable name of the active strategy
    pub fn strategy_name(&self) -> &'static str {
        match self.strategy {
            Strategy::SingleStage { .. } => "single_stage",
            Strategy::TwoStage { .. } => "two_stage",
        }
    }

    /// Extract identifiers from a log line, `None` when the line is not an OOM kill
    pub fn extract(&self, line: &str) -> Option<KillMatch> {
        match &self.strategy {
            Strategy::SingleStage { pattern } => {
                let caps = pattern.captures(line)?;
                let pod_uid = group(&caps, POD_UID_GROUP).unwrap_or_default();
                match group(&caps, CONTAINER_ID_GROUP) {
                    Some(container_id) => Some(KillMatch::PodAndContainer {
                        pod_uid,
                        container_id,
                    }),
                    None if !pod_uid.is_empty() => Some(KillMatch::PodOnly { pod_uid }),
                    None => None,
                }
            }
            Strategy::TwoStage { oom, pod } => {
                if !oom.is_match(line) {
                    return None;
                }
                let caps = pod.captures(line)?;
                let pod_uid = group(&caps, POD_UID_GROUP).or_else(|| {
                    caps.get(1)
                        .map(|m| m.as_str().to_string())
                        .filter(|s| !s.is_empty())
                })?;
                Some(KillMatch::PodOnly { pod_uid })
            }
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError::Invalid {
        pattern: pattern.to_string(),
        source,
    })
}

/// Non-empty named group value
fn group(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
