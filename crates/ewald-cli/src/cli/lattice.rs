use ewald_core::{DipoleParticle, Vec3};
use serde::Serialize;

/// Dipole direction assigned to every lattice site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum Orientation {
    X,
    Y,
    Z,
    /// `+z` and `-z` on the two interpenetrating sublattices.
    Alternating,
}

impl Orientation {
    fn direction(self, site: [usize; 3]) -> Vec3 {
        match self {
            Self::X => [1.0, 0.0, 0.0],
            Self::Y => [0.0, 1.0, 0.0],
            Self::Z => [0.0, 0.0, 1.0],
            Self::Alternating => {
                if (site[0] + site[1] + site[2]) % 2 == 0 {
                    [0.0, 0.0, 1.0]
                } else {
                    [0.0, 0.0, -1.0]
                }
            }
        }
    }
}

/// `per_edge^3` dipoles at the centres of a simple cubic lattice filling a
/// box of side `side`. Indices follow x slowest, z fastest.
pub(super) fn simple_cubic(
    per_edge: usize,
    side: f64,
    orientation: Orientation,
) -> Vec<DipoleParticle> {
    let spacing = side / per_edge as f64;
    let mut particles = Vec::with_capacity(per_edge.pow(3));
    for i in 0..per_edge {
        for j in 0..per_edge {
            for k in 0..per_edge {
                let site = [i, j, k];
                let position = site.map(|c| (c as f64 + 0.5) * spacing);
                particles.push(DipoleParticle::new(
                    particles.len(),
                    position,
                    orientation.direction(site),
                ));
            }
        }
    }
    particles
}
