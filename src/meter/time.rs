use std::time::{Duration, Instant};

use super::average::AverageMeter;

/// Wall-clock time since construction or the last reset.
/// Reading it does not restart the clock.
#[derive(Debug, Clone)]
pub struct TimeMeter {
    started: Instant,
    skip_reset: bool,
}

impl Default for TimeMeter {
    fn default() -> Self {
        Self { started: Instant::now(), skip_reset: false }
    }
}

impl TimeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measures the whole run instead of a single step.
    pub fn sticky() -> Self {
        Self { skip_reset: true, ..Self::default() }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn value(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    pub fn reset(&mut self) {
        if !self.skip_reset {
            self.started = Instant::now();
        }
    }

    pub fn is_sticky(&self) -> bool {
        self.skip_reset
    }
}

/// Runs `f` and adds its duration, in seconds, to `meter`.
pub fn time_into<T>(meter: &mut AverageMeter, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    meter.add(start.elapsed().as_secs_f64());
    out
}

/// Iterator adapter that measures how long each pull on the inner iterator blocks.
///
/// The exhausting `None` pull is not recorded, so the meter holds one sample per
/// yielded item.
#[derive(Debug)]
pub struct TimedIter<I> {
    inner: I,
    meter: AverageMeter,
}

impl<I: Iterator> TimedIter<I> {
    pub fn new(inner: I) -> Self {
        Self { inner, meter: AverageMeter::new() }
    }

    pub fn meter(&self) -> &AverageMeter {
        &self.meter
    }

    pub fn into_meter(self) -> AverageMeter {
        self.meter
    }
}

impl<I: Iterator> Iterator for TimedIter<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let start = Instant::now();
        let item = self.inner.next()?;
        self.meter.add(start.elapsed().as_secs_f64());
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Extension for wrapping any iterator in a [`TimedIter`].
pub trait TimedExt: Iterator + Sized {
    fn timed(self) -> TimedIter<Self> {
        TimedIter::new(self)
    }
}

impl<I: Iterator> TimedExt for I {}
