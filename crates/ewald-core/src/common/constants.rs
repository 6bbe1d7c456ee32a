//! Numerical constants shared by the Ewald kernels.

pub const PI: f64 = std::f64::consts::PI;
pub const PI2: f64 = std::f64::consts::TAU;
/// `1 / sqrt(pi)`
pub const RSQRT_PI: f64 = 0.564_189_583_547_756_286_948_079_451_560_772_6_f64;
/// Product `kappa * rc` fixed by the splitting rule `kappa = 5 / (2 rc)`.
pub const KAPPA_CUTOFF_PRODUCT: f64 = 2.5;
