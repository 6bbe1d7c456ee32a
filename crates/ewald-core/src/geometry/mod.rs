//! Cubic periodic box and the small amount of 3-vector algebra the sums need.

pub type Vec3 = [f64; 3];

pub const X: usize = 0;
pub const Y: usize = 1;
pub const Z: usize = 2;

#[inline]
pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[X] * b[X] + a[Y] * b[Y] + a[Z] * b[Z]
}

#[inline]
pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[Y] * b[Z] - a[Z] * b[Y],
        a[Z] * b[X] - a[X] * b[Z],
        a[X] * b[Y] - a[Y] * b[X],
    ]
}

#[inline]
pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

#[inline]
pub fn scale(a: Vec3, factor: f64) -> Vec3 {
    [a[X] * factor, a[Y] * factor, a[Z] * factor]
}

#[inline]
pub fn add_assign(target: &mut Vec3, value: Vec3) {
    target[X] += value[X];
    target[Y] += value[Y];
    target[Z] += value[Z];
}

#[inline]
pub fn sub_assign(target: &mut Vec3, value: Vec3) {
    target[X] -= value[X];
    target[Y] -= value[Y];
    target[Z] -= value[Z];
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("box side length must be finite and > 0, got {value}")]
    InvalidSide { value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicBox {
    side: f64,
}

impl PeriodicBox {
    pub fn cubic(side: f64) -> Result<Self, GeometryError> {
        if !side.is_finite() || side <= 0.0 {
            return Err(GeometryError::InvalidSide { value: side });
        }
        Ok(Self { side })
    }

    pub fn side(&self) -> f64 {
        self.side
    }

    pub fn volume(&self) -> f64 {
        self.side * self.side * self.side
    }

    /// Map a position into the primary cell `[0, L)`.
    pub fn wrap(&self, position: Vec3) -> Vec3 {
        position.map(|component| {
            let wrapped = component.rem_euclid(self.side);
            // rem_euclid can round up to exactly L for tiny negative inputs
            if wrapped >= self.side { 0.0 } else { wrapped }
        })
    }

    /// Minimum-image vector pointing from `from` to `to`.
    pub fn separation(&self, from: Vec3, to: Vec3) -> Vec3 {
        let mut delta = [to[X] - from[X], to[Y] - from[Y], to[Z] - from[Z]];
        for component in &mut delta {
            *component -= self.side * (*component / self.side).round();
        }
        delta
    }
}
