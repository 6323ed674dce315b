use std::collections::HashMap;
use tracing::{debug, error, info};

use super::error::TelemetryError;
use super::snapshot::{SinkFailure, Snapshot, StepReport};
use crate::meter::{time_into, AverageMeter, Meter, MeterValue};
use crate::sink::Sink;

/// Ordered mapping from key to meter, plus the sinks that render it every step.
///
/// The key set is fixed at construction. Every lookup by an unknown key is an error.
pub struct Telemetry {
    meters: Vec<(String, Meter)>,
    index: HashMap<String, usize>,
    sinks: Vec<Box<dyn Sink>>,
    step: u64,
}

impl Telemetry {
    pub fn new<I, K>(meters: I) -> Result<Self, TelemetryError>
    where
        I: IntoIterator<Item = (K, Meter)>,
        K: Into<String>,
    {
        let mut telemetry = Self {
            meters: Vec::new(),
            index: HashMap::new(),
            sinks: Vec::new(),
            step: 0,
        };

        for (key, meter) in meters {
            let key = key.into();
            if telemetry.index.contains_key(&key) {
                return Err(TelemetryError::DuplicateKey(key));
            }
            telemetry.index.insert(key.clone(), telemetry.meters.len());
            telemetry.meters.push((key, meter));
        }

        Ok(telemetry)
    }

    /// Registers a sink. Every subscribed key is checked before the sink's own
    /// `prepare` runs, so a bad subscription never leaves side effects behind.
    pub fn sink(&mut self, mut sink: impl Sink + 'static) -> Result<(), TelemetryError> {
        for keys in sink.subscriptions() {
            for key in keys {
                if !self.index.contains_key(key) {
                    return Err(TelemetryError::UnknownKey(key.clone()));
                }
            }
        }

        let known: Vec<&str> = self.keys().collect();
        sink.prepare(&known).map_err(|source| TelemetryError::Sink {
            sink: sink.name().to_string(),
            source,
        })?;

        info!("Sink '{}' registered with {} view(s)", sink.name(), sink.subscriptions().len());
        self.sinks.push(Box::new(sink));
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.meters.iter().map(|(k, _)| k.as_str())
    }

    pub fn get(&self, key: &str) -> Result<&Meter, TelemetryError> {
        let i = self.slot(key)?;
        Ok(&self.meters[i].1)
    }

    pub fn meter_mut(&mut self, key: &str) -> Result<&mut Meter, TelemetryError> {
        let i = self.slot(key)?;
        Ok(&mut self.meters[i].1)
    }

    pub fn value(&self, key: &str) -> Result<MeterValue, TelemetryError> {
        Ok(self.get(key)?.value())
    }

    /// Accumulates into `key`. See [`Meter::add`] for the returned flag.
    pub fn add(&mut self, key: &str, value: impl Into<MeterValue>) -> Result<bool, TelemetryError> {
        self.meter_mut(key)?
            .add(value.into())
            .map_err(|source| TelemetryError::Meter { key: key.to_string(), source })
    }

    pub fn set(&mut self, key: &str, value: impl Into<MeterValue>) -> Result<(), TelemetryError> {
        self.meter_mut(key)?
            .set(value.into())
            .map_err(|source| TelemetryError::Meter { key: key.to_string(), source })
    }

    /// Folds the samples of a meter owned elsewhere (an evaluator, a timed
    /// iterator) into the average meter at `key`.
    pub fn merge(&mut self, key: &str, other: &AverageMeter) -> Result<(), TelemetryError> {
        match self.meter_mut(key)? {
            Meter::Average(m) => {
                m.merge(other);
                Ok(())
            }
            _ => Err(TelemetryError::NotAverage { key: key.to_string() }),
        }
    }

    /// Runs `f`, adding its wall time in seconds to the average meter at `key`.
    pub fn timed<T>(&mut self, key: &str, f: impl FnOnce() -> T) -> Result<T, TelemetryError> {
        match self.meter_mut(key)? {
            Meter::Average(m) => Ok(time_into(m, f)),
            _ => Err(TelemetryError::NotAverage { key: key.to_string() }),
        }
    }

    pub fn step_index(&self) -> u64 {
        self.step
    }

    /// Renders every sink view with its subscribed values, then advances the step counter.
    ///
    /// A failing view is logged and recorded in the report. Remaining views and
    /// sinks still render.
    pub fn step(&mut self) -> StepReport {
        let step = self.step;
        let mut report = StepReport::new(step);

        for sink in self.sinks.iter_mut() {
            let frames: Vec<Snapshot> = sink
                .subscriptions()
                .into_iter()
                .map(|keys| gather(&self.meters, &self.index, keys))
                .collect();

            for (view, frame) in frames.iter().enumerate() {
                match sink.render(step, view, frame) {
                    Ok(()) => {
                        debug!("Step {}: sink '{}' view {} rendered", step, sink.name(), view);
                        report.rendered += 1;
                    }
                    Err(e) => {
                        error!("Step {}: sink '{}' view {} failed: {}", step, sink.name(), view, e);
                        report.failures.push(SinkFailure {
                            sink: sink.name().to_string(),
                            view,
                            error: e,
                        });
                    }
                }
            }
        }

        self.step += 1;
        report
    }

    /// Clears every non-sticky meter.
    pub fn reset(&mut self) {
        for (_, meter) in self.meters.iter_mut() {
            meter.reset();
        }
    }

    fn slot(&self, key: &str) -> Result<usize, TelemetryError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| TelemetryError::UnknownKey(key.to_string()))
    }
}

fn gather(meters: &[(String, Meter)], index: &HashMap<String, usize>, keys: &[String]) -> Snapshot {
    keys.iter()
        .filter_map(|k| index.get(k).map(|&i| (k.clone(), meters[i].1.value())))
        .collect()
}
