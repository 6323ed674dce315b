/// Running mean of scalar observations.
///
/// `value()` is NaN until the first `add`, matching an empty window.
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    n: u64,
    sum: f64,
    skip_reset: bool,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sticky() -> Self {
        Self { skip_reset: true, ..Self::default() }
    }

    /// Non-finite inputs are recorded as-is and surface as NaN in `value()`.
    pub fn add(&mut self, value: f64) {
        self.n += 1;
        self.sum += value;
    }

    pub fn value(&self) -> f64 {
        if self.n == 0 {
            return f64::NAN;
        }
        self.sum / self.n as f64
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Folds another meter's observations into this one, as if they had been added here.
    pub fn merge(&mut self, other: &AverageMeter) {
        self.n += other.n;
        self.sum += other.sum;
    }

    pub fn reset(&mut self) {
        if self.skip_reset {
            return;
        }
        self.n = 0;
        self.sum = 0.0;
    }

    pub fn is_sticky(&self) -> bool {
        self.skip_reset
    }
}
