use serde_json::{Map, Value};

use crate::meter::MeterValue;
use crate::sink::SinkError;

/// The values of one subscription, reduced from their meters, in subscription order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<(String, MeterValue)>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: MeterValue) {
        self.entries.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&MeterValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MeterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.iter().map(|(k, v)| (k.to_string(), v.to_json())).collect()
    }
}

impl FromIterator<(String, MeterValue)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (String, MeterValue)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// A view that failed to render during a step.
#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub view: usize,
    pub error: SinkError,
}

/// Outcome of one `Telemetry::step`.
#[derive(Debug, Default)]
pub struct StepReport {
    pub step: u64,
    pub rendered: usize,
    pub failures: Vec<SinkFailure>,
}

impl StepReport {
    pub fn new(step: u64) -> Self {
        Self { step, ..Self::default() }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_sinks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.failures.iter().map(|f| f.sink.as_str()).collect();
        names.dedup();
        names
    }
}
