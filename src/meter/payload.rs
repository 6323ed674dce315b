use image::RgbImage;
use serde_json::{json, Number, Value};

/// The reduced value of a meter as handed to sinks.
///
/// Scalar meters always produce `Scalar` (or `Seconds` for timers). Value meters
/// carry whatever the producer stored, which is why the payload is a tagged union
/// rather than a plain float.
#[derive(Debug, Clone, PartialEq)]
pub enum MeterValue {
    Empty,
    Scalar(f64),
    Integer(i64),
    Text(String),
    Seconds(f64),
    Tensor { shape: Vec<usize>, data: Vec<f64> },
    Json(Value),
    Images(Vec<RgbImage>),
}

impl MeterValue {
    /// Short name of the payload kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            MeterValue::Empty => "empty",
            MeterValue::Scalar(_) => "scalar",
            MeterValue::Integer(_) => "integer",
            MeterValue::Text(_) => "text",
            MeterValue::Seconds(_) => "seconds",
            MeterValue::Tensor { .. } => "tensor",
            MeterValue::Json(_) => "json",
            MeterValue::Images(_) => "images",
        }
    }

    /// Numeric view of the payload, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MeterValue::Scalar(v) | MeterValue::Seconds(v) => Some(*v),
            MeterValue::Integer(v) => Some(*v as f64),
            MeterValue::Json(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, MeterValue::Empty)
    }

    /// Builds a tensor payload, checking that `shape` accounts for every element.
    pub fn tensor(shape: Vec<usize>, data: Vec<f64>) -> Option<Self> {
        if !shape_fits(&shape, data.len()) {
            return None;
        }
        Some(MeterValue::Tensor { shape, data })
    }

    /// False only for a `Tensor` whose shape disagrees with its element count.
    pub fn is_well_formed(&self) -> bool {
        match self {
            MeterValue::Tensor { shape, data } => shape_fits(shape, data.len()),
            _ => true,
        }
    }

    /// JSON rendering used by file and network sinks.
    /// Non-finite floats become `null` since JSON has no representation for them.
    pub fn to_json(&self) -> Value {
        match self {
            MeterValue::Empty => Value::Null,
            MeterValue::Scalar(v) | MeterValue::Seconds(v) => float(*v),
            MeterValue::Integer(v) => Value::from(*v),
            MeterValue::Text(s) => Value::String(s.clone()),
            MeterValue::Tensor { shape, data } if shape_fits(shape, data.len()) => nest(shape, data),
            MeterValue::Tensor { .. } => Value::Null,
            MeterValue::Json(v) => v.clone(),
            MeterValue::Images(images) => Value::Array(
                images
                    .iter()
                    .map(|img| json!({ "width": img.width(), "height": img.height() }))
                    .collect(),
            ),
        }
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn shape_fits(shape: &[usize], len: usize) -> bool {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)) == Some(len)
}

// Callers guarantee `shape_fits(shape, data.len())`.
fn nest(shape: &[usize], data: &[f64]) -> Value {
    match shape.split_first() {
        None => data.first().map(|v| float(*v)).unwrap_or(Value::Null),
        Some((_, [])) => Value::Array(data.iter().map(|v| float(*v)).collect()),
        Some((&outer, rest)) => {
            let stride: usize = rest.iter().product();
            Value::Array(
                (0..outer)
                    .map(|i| match data.get(i * stride..(i + 1) * stride) {
                        Some(chunk) => nest(rest, chunk),
                        None => Value::Null,
                    })
                    .collect(),
            )
        }
    }
}

impl Default for MeterValue {
    fn default() -> Self {
        MeterValue::Empty
    }
}

impl From<f64> for MeterValue {
    fn from(v: f64) -> Self {
        MeterValue::Scalar(v)
    }
}

impl From<f32> for MeterValue {
    fn from(v: f32) -> Self {
        MeterValue::Scalar(v as f64)
    }
}

impl From<i64> for MeterValue {
    fn from(v: i64) -> Self {
        MeterValue::Integer(v)
    }
}

// Values past `i64::MAX` keep their magnitude as a float.
impl From<u64> for MeterValue {
    fn from(v: u64) -> Self {
        i64::try_from(v).map(MeterValue::Integer).unwrap_or(MeterValue::Scalar(v as f64))
    }
}

impl From<usize> for MeterValue {
    fn from(v: usize) -> Self {
        MeterValue::from(v as u64)
    }
}

impl From<&str> for MeterValue {
    fn from(v: &str) -> Self {
        MeterValue::Text(v.to_string())
    }
}

impl From<String> for MeterValue {
    fn from(v: String) -> Self {
        MeterValue::Text(v)
    }
}

impl From<Value> for MeterValue {
    fn from(v: Value) -> Self {
        MeterValue::Json(v)
    }
}

impl From<Vec<f64>> for MeterValue {
    fn from(data: Vec<f64>) -> Self {
        MeterValue::Tensor { shape: vec![data.len()], data }
    }
}

impl From<Vec<RgbImage>> for MeterValue {
    fn from(images: Vec<RgbImage>) -> Self {
        MeterValue::Images(images)
    }
}
