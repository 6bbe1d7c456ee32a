use serde::{Deserialize, Serialize};

/// User-facing inputs of the dipolar Ewald sum.
///
/// The box is a cube of side `box_length`; conducting (tin-foil) boundary
/// conditions at infinity are implied. Values are checked when the
/// parameters are derived, not here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EwaldConfig {
    /// Dipole moment magnitude shared by every particle.
    pub dipole_moment: f64,
    pub real_cutoff: f64,
    pub box_length: f64,
}

impl EwaldConfig {
    pub fn new(dipole_moment: f64, real_cutoff: f64, box_length: f64) -> Self {
        Self {
            dipole_moment,
            real_cutoff,
            box_length,
        }
    }
}
