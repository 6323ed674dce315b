/// Running maximum. Starts at negative infinity.
#[derive(Debug, Clone)]
pub struct MaxMeter {
    max: f64,
    skip_reset: bool,
}

impl Default for MaxMeter {
    fn default() -> Self {
        Self { max: f64::NEG_INFINITY, skip_reset: false }
    }
}

impl MaxMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sticky() -> Self {
        Self { skip_reset: true, ..Self::default() }
    }

    /// Returns true when `value` raised the maximum. Ties and NaN never do.
    pub fn add(&mut self, value: f64) -> bool {
        if value > self.max {
            self.max = value;
            return true;
        }
        false
    }

    pub fn value(&self) -> f64 {
        self.max
    }

    pub fn reset(&mut self) {
        if !self.skip_reset {
            self.max = f64::NEG_INFINITY;
        }
    }

    pub fn is_sticky(&self) -> bool {
        self.skip_reset
    }
}
