use std::io::{self, Stdout, Write};

use super::{key_sets, Sink, SinkError, Subscription};
use crate::meter::MeterValue;
use crate::telemetry::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleView {
    /// `[step N] key = value, key = value`
    KeyValue,
}

pub struct ConsoleSink<W: Write + Send = Stdout> {
    out: W,
    views: Vec<Subscription<ConsoleView>>,
}

impl ConsoleSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, views: Vec::new() }
    }

    pub fn key_value<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.views.push(Subscription::new(keys, ConsoleView::KeyValue));
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn name(&self) -> &str {
        "console"
    }

    fn subscriptions(&self) -> Vec<&[String]> {
        key_sets(&self.views)
    }

    fn prepare(&mut self, _known_keys: &[&str]) -> Result<(), SinkError> {
        Ok(())
    }

    fn render(&mut self, step: u64, view: usize, values: &Snapshot) -> Result<(), SinkError> {
        let sub = self.views.get(view).ok_or(SinkError::UnknownView(view))?;
        match sub.view {
            ConsoleView::KeyValue => {
                let line = values
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, format_value(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(self.out, "[step {}] {}", step, line)?;
                self.out.flush()?;
            }
        }
        Ok(())
    }
}

/// Type-directed formatting for terminal output.
pub fn format_value(value: &MeterValue) -> String {
    match value {
        MeterValue::Empty => "-".to_string(),
        MeterValue::Scalar(v) if v.is_nan() => "nan".to_string(),
        MeterValue::Scalar(v) => format!("{:.6}", v),
        MeterValue::Integer(v) => v.to_string(),
        MeterValue::Text(s) => s.clone(),
        MeterValue::Seconds(s) => format_seconds(*s),
        MeterValue::Tensor { shape, .. } => format!(
            "tensor[{}]",
            shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("x")
        ),
        MeterValue::Json(v) => v.to_string(),
        MeterValue::Images(images) => format!("{} image(s)", images.len()),
    }
}

/// `850.0ms`, `12.34s`, `2m 03.5s`
pub fn format_seconds(secs: f64) -> String {
    if !secs.is_finite() {
        return "nan".to_string();
    }
    // Thresholds sit where the rounded text would roll over into the next unit.
    if secs < 0.99995 {
        return format!("{:.1}ms", secs * 1000.0);
    }
    if secs < 59.995 {
        return format!("{:.2}s", secs);
    }
    let tenths = (secs * 10.0).round() as u64;
    format!("{}m {:04.1}s", tenths / 600, (tenths % 600) as f64 / 10.0)
}
