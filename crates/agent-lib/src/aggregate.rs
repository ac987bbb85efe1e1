//! OOM-kill counter space
//!
//! Projects workload metadata through a fixed label schema and counts kills
//! per label combination. Series are created lazily, only ever incremented
//! and never evicted.

use crate::models::WorkloadMetadata;
use prometheus::{IntCounterVec, Opts, Registry};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub const OOMKILL_METRIC_NAME: &str = "klog_pod_oomkill";
pub const OOMKILL_METRIC_HELP: &str = "Extract metrics for OOMKilled pods from kernel log";

/// Runtime label keys exported by default, with their metric label names
pub const DEFAULT_SCHEMA: &[(&str, &str)] = &[
    ("io.kubernetes.container.name", "container_name"),
    ("io.kubernetes.pod.namespace", "namespace"),
    ("io.kubernetes.pod.uid", "pod_uid"),
    ("io.kubernetes.pod.name", "pod_name"),
];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("label key {0:?} does not produce a usable metric label name")]
    EmptyLabelName(String),

    #[error("metric label {0:?} is declared more than once")]
    DuplicateLabelName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SchemaEntry {
    runtime_key: String,
    metric_label: String,
}

/// Mapping from runtime label keys to exported metric label names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSchema {
    entries: Vec<SchemaEntry>,
}

impl Default for LabelSchema {
    fn default() -> Self {
        Self {
            entries: DEFAULT_SCHEMA
                .iter()
                .map(|(key, label)| SchemaEntry {
                    runtime_key: key.to_string(),
                    metric_label: label.to_string(),
                })
                .collect(),
        }
    }
}

impl LabelSchema {
    /// Build a schema from explicit (runtime key, metric label) pairs
    pub fn new<I, K, L>(entries: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (K, L)>,
        K: Into<String>,
        L: Into<String>,
    {
        let mut schema = Self {
            entries: Vec::new(),
        };
        for (key, label) in entries {
            schema.push(key.into(), label.into())?;
        }
        Ok(schema)
    }

    /// Default schema extended with extra runtime label keys.
    ///
    /// Each extra key is exported under its sanitized name.
    pub fn with_extra_labels<S: AsRef<str>>(extra: &[S]) -> Result<Self, SchemaError> {
        let mut schema = Self::default();
        for key in extra {
            let key = key.as_ref();
            schema.push(key.to_string(), sanitize_label_name(key))?;
        }
        Ok(schema)
    }

    fn push(&mut self, runtime_key: String, metric_label: String) -> Result<(), SchemaError> {
        if metric_label.is_empty() {
            return Err(SchemaError::EmptyLabelName(runtime_key));
        }
        if self.entries.iter().any(|e| e.metric_label == metric_label) {
            return Err(SchemaError::DuplicateLabelName(metric_label));
        }
        self.entries.push(SchemaEntry {
            runtime_key,
            metric_label,
        });
        Ok(())
    }

    pub fn metric_labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.metric_label.as_str()).collect()
    }

    pub fn runtime_keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.runtime_key.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label values for this metadata, in schema order. Absent keys become `""`.
    pub fn project(&self, metadata: &WorkloadMetadata) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| metadata.label(&e.runtime_key).to_string())
            .collect()
    }
}

/// Replace every character that is illegal in a Prometheus label name with `_`
pub fn sanitize_label_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Counter of OOM kills keyed by the schema's label values
#[derive(Clone)]
pub struct OomKillCounter {
    counter: IntCounterVec,
    schema: Arc<LabelSchema>,
}

impl OomKillCounter {
    /// Create the counter and register it in `registry`
    pub fn new(registry: &Registry, schema: Arc<LabelSchema>) -> prometheus::Result<Self> {
        let counter = IntCounterVec::new(
            Opts::new(OOMKILL_METRIC_NAME, OOMKILL_METRIC_HELP),
            &schema.metric_labels(),
        )?;
        registry.register(Box::new(counter.clone()))?;

        Ok(Self { counter, schema })
    }

    pub fn schema(&self) -> &LabelSchema {
        &self.schema
    }

    /// Same series, projected through another schema
    #[cfg(test)]
    pub(crate) fn with_schema(&self, schema: Arc<LabelSchema>) -> Self {
        Self {
            counter: self.counter.clone(),
            schema,
        }
    }

    /// Count one kill for this workload, returning the label values used
    pub fn record(&self, metadata: &WorkloadMetadata) -> prometheus::Result<Vec<String>> {
        let values = self.schema.project(metadata);
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        self.counter.get_metric_with_label_values(&refs)?.inc();
        Ok(values)
    }

    /// Current value of a series, `None` if it has never been recorded
    pub fn value(&self, label_values: &[&str]) -> Option<u64> {
        self.collect_series()
            .into_iter()
            .find(|(values, _)| values.iter().map(String::as_str).eq(label_values.iter().copied()))
            .map(|(_, v)| v)
    }

    /// Number of distinct label combinations observed so far
    pub fn series_count(&self) -> usize {
        self.collect_series()
            .into_iter()
            .map(|(values, _)| values)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Snapshot of every series as (label values in schema order, count)
    fn collect_series(&self) -> Vec<(Vec<String>, u64)> {
        use prometheus::core::Collector;

        let order = self.schema.metric_labels();
        self.counter
            .collect()
            .iter()
            .flat_map(|family| family.get_metric().iter())
            .map(|metric| {
                let pairs = metric.get_label();
                let values = order
                    .iter()
                    .map(|name| {
                        pairs
                            .iter()
                            .find(|p| p.get_name() == *name)
                            .map(|p| p.get_value().to_string())
                            .unwrap_or_default()
                    })
                    .collect();
                (values, metric.get_counter().get_value() as u64)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn metadata(pairs: &[(&str, &str)]) -> WorkloadMetadata {
        let labels: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkloadMetadata::new("c1", labels)
    }

    fn counter() -> OomKillCounter {
        OomKillCounter::new(&Registry::new(), Arc::new(LabelSchema::default())).unwrap()
    }

    #[test]
    fn test_sanitize_label_name() {
        assert_eq!(
            sanitize_label_name("io.kubernetes.container.name"),
            "io_kubernetes_container_name"
        );
        assert_eq!(sanitize_label_name("app.kubernetes.io/part-of"), "app_kubernetes_io_part_of");
        assert_eq!(sanitize_label_name("9lives"), "_9lives");
        assert_eq!(sanitize_label_name("already_fine"), "already_fine");
    }

    #[test]
    fn test_default_schema_labels() {
        let schema = LabelSchema::default();
        assert_eq!(
            schema.metric_labels(),
            vec!["container_name", "namespace", "pod_uid", "pod_name"]
        );
        assert_eq!(schema.runtime_keys()[0], "io.kubernetes.container.name");
    }

    #[test]
    fn test_extra_labels_are_sanitized() {
        let schema = LabelSchema::with_extra_labels(&["app.kubernetes.io/name"]).unwrap();
        assert_eq!(schema.len(), 5);
        assert_eq!(schema.metric_labels()[4], "app_kubernetes_io_name");
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let err = LabelSchema::new([("a.b", "x"), ("c.d", "x")]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateLabelName(name) if name == "x"));

        assert!(matches!(
            LabelSchema::new([("a", "")]),
            Err(SchemaError::EmptyLabelName(_))
        ));
    }

    #[test]
    fn test_projection_substitutes_empty_for_missing_keys() {
        let schema = LabelSchema::default();
        let values = schema.project(&metadata(&[
            ("io.kubernetes.container.name", "app"),
            ("io.kubernetes.pod.namespace", "default"),
            ("unrelated", "ignored"),
        ]));

        assert_eq!(values, vec!["app", "default", "", ""]);
    }

    #[test]
    fn test_record_accumulates_per_series() {
        let counter = counter();
        let app = metadata(&[
            ("io.kubernetes.container.name", "app"),
            ("io.kubernetes.pod.namespace", "default"),
        ]);
        let db = metadata(&[
            ("io.kubernetes.container.name", "db"),
            ("io.kubernetes.pod.namespace", "default"),
        ]);

        for _ in 0..5 {
            counter.record(&app).unwrap();
        }
        counter.record(&db).unwrap();

        assert_eq!(counter.value(&["app", "default", "", ""]), Some(5));
        assert_eq!(counter.value(&["db", "default", "", ""]), Some(1));
        assert_eq!(counter.value(&["web", "default", "", ""]), None);
        assert_eq!(counter.series_count(), 2);
    }

    #[test]
    fn test_record_with_no_labels_still_counts() {
        let counter = counter();
        let values = counter.record(&WorkloadMetadata::default()).unwrap();

        assert_eq!(values, vec!["", "", "", ""]);
        assert_eq!(counter.value(&["", "", "", ""]), Some(1));
    }

    #[test]
    fn test_counter_is_exposed_in_registry() {
        let registry = Registry::new();
        let counter = OomKillCounter::new(&registry, Arc::new(LabelSchema::default())).unwrap();
        counter
            .record(&metadata(&[("io.kubernetes.container.name", "app")]))
            .unwrap();

        let families = registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == OOMKILL_METRIC_NAME)
            .unwrap();
        assert_eq!(family.get_help(), OOMKILL_METRIC_HELP);
        assert_eq!(family.get_metric().len(), 1);
    }

    #[test]
    fn test_registering_twice_fails() {
        let registry = Registry::new();
        let schema = Arc::new(LabelSchema::default());
        OomKillCounter::new(&registry, schema.clone()).unwrap();

        assert!(OomKillCounter::new(&registry, schema).is_err());
    }
}
