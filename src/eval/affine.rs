/// Row-vector affine map `p' = p·M + b`, taking normalized model coordinates back
/// to the original image space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine2 {
    pub m: [[f64; 2]; 2],
    pub b: [f64; 2],
}

impl Affine2 {
    pub const IDENTITY: Affine2 = Affine2 { m: [[1.0, 0.0], [0.0, 1.0]], b: [0.0, 0.0] };

    pub fn new(m: [[f64; 2]; 2], b: [f64; 2]) -> Self {
        Self { m, b }
    }

    /// Uniform scale about the origin followed by a translation.
    pub fn scale_translate(scale: f64, dx: f64, dy: f64) -> Self {
        Self { m: [[scale, 0.0], [0.0, scale]], b: [dx, dy] }
    }

    pub fn apply(&self, p: [f64; 2]) -> [f64; 2] {
        [
            p[0] * self.m[0][0] + p[1] * self.m[1][0] + self.b[0],
            p[0] * self.m[0][1] + p[1] * self.m[1][1] + self.b[1],
        ]
    }
}

impl Default for Affine2 {
    fn default() -> Self {
        Self::IDENTITY
    }
}
