pub mod errors;

pub use errors::{EwaldError, EwaldErrorCategory, EwaldResult};

use crate::geometry::Vec3;
use serde::{Deserialize, Serialize};

/// A point dipole as seen by the Ewald module.
///
/// Position and orientation are read; force and torque are additive
/// accumulators that the sums only ever add to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DipoleParticle {
    /// Stable identifier, unique across all processes. Pairs are counted
    /// once, from the particle with the smaller index.
    pub index: usize,
    pub position: Vec3,
    /// Unit dipole direction.
    pub orientation: Vec3,
    pub force: Vec3,
    pub torque: Vec3,
}

impl DipoleParticle {
    pub fn new(index: usize, position: Vec3, orientation: Vec3) -> Self {
        Self {
            index,
            position,
            orientation,
            force: [0.0; 3],
            torque: [0.0; 3],
        }
    }

    pub fn zero_accumulators(&mut self) {
        self.force = [0.0; 3];
        self.torque = [0.0; 3];
    }
}

/// Energy contributions of one evaluation. Valid until the next `sum()`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyReport {
    pub real: f64,
    pub fourier: f64,
    #[serde(rename = "self")]
    pub self_energy: f64,
}

impl EnergyReport {
    pub const ZERO: Self = Self {
        real: 0.0,
        fourier: 0.0,
        self_energy: 0.0,
    };

    pub fn total(&self) -> f64 {
        self.real + self.fourier + self.self_energy
    }
}
