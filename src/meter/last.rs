use super::payload::MeterValue;

/// Holds the most recently stored payload.
#[derive(Debug, Clone, Default)]
pub struct ValueMeter {
    value: MeterValue,
    skip_reset: bool,
}

impl ValueMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sticky() -> Self {
        Self { skip_reset: true, ..Self::default() }
    }

    pub fn set(&mut self, value: impl Into<MeterValue>) {
        self.value = value.into();
    }

    pub fn value(&self) -> &MeterValue {
        &self.value
    }

    pub fn reset(&mut self) {
        if !self.skip_reset {
            self.value = MeterValue::Empty;
        }
    }

    pub fn is_sticky(&self) -> bool {
        self.skip_reset
    }
}
