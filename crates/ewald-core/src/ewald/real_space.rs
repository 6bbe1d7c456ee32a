use super::parameters::EwaldParameters;
use crate::cells::CellList;
use crate::common::constants::RSQRT_PI;
use crate::geometry::{Vec3, X, Y, Z, add_assign, cross, dot, norm, scale, sub_assign};
use statrs::function::erf::erfc;

/// Screened radial coefficients of the real-space dipole kernel at
/// separation `r`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScreenedCoefficients {
    b: f64,
    c: f64,
    d: f64,
}

impl ScreenedCoefficients {
    fn at(params: &EwaldParameters, r: f64) -> Self {
        let kappa = params.kappa;
        let kappa_sq = kappa * kappa;
        let mu_sq = params.mu_sq();
        let rr = 1.0 / r;
        let rr_sq = rr * rr;

        let b1 = mu_sq * erfc(kappa * r) * rr_sq * rr;
        let b2 = mu_sq * (2.0 * kappa * RSQRT_PI) * (-kappa_sq * r * r).exp() * rr_sq;
        let c = 3.0 * b1 * rr_sq + (2.0 * kappa_sq + 3.0 * rr_sq) * b2;
        Self {
            b: b1 + b2,
            c,
            d: 5.0 * c * rr_sq + 4.0 * kappa_sq * kappa_sq * b2,
        }
    }
}

/// Contribution of one interacting pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairInteraction {
    pub energy: f64,
    /// Force on the first particle; the second receives the negation.
    pub force: Vec3,
    pub torque_on_first: Vec3,
    pub torque_on_second: Vec3,
}

/// Real-space interaction of dipoles `u1` and `u2` with `r12 = r1 - r2`
/// (minimum image). `None` at or beyond the cutoff.
pub fn pair_interaction(
    params: &EwaldParameters,
    u1: Vec3,
    u2: Vec3,
    r12: Vec3,
) -> Option<PairInteraction> {
    let r = norm(r12);
    if r >= params.real_cutoff {
        return None;
    }

    let ScreenedCoefficients { b, c, d } = ScreenedCoefficients::at(params, r);
    let udotu = dot(u1, u2);
    let u1dotr = dot(u1, r12);
    let u2dotr = dot(u2, r12);

    let radial = udotu * c - u1dotr * u2dotr * d;
    let force = [X, Y, Z].map(|i| radial * r12[i] + c * (u2dotr * u1[i] + u1dotr * u2[i]));

    let g1 = [X, Y, Z].map(|i| b * u2[i] - c * u2dotr * r12[i]);
    let g2 = [X, Y, Z].map(|i| b * u1[i] - c * u1dotr * r12[i]);

    Some(PairInteraction {
        energy: udotu * b - u1dotr * u2dotr * c,
        force,
        torque_on_first: scale(cross(u1, g1), -1.0),
        torque_on_second: scale(cross(u2, g2), -1.0),
    })
}

/// Energy of a single pair; zero at or beyond the cutoff.
pub fn real_space_pair_energy(params: &EwaldParameters, u1: Vec3, u2: Vec3, r12: Vec3) -> f64 {
    pair_interaction(params, u1, u2, r12).map_or(0.0, |pair| pair.energy)
}

/// Cutoff-limited pair sum over the 27-cell neighbourhood of every interior
/// cell. Forces and torques are added to the registry's accumulators, halo
/// copies included; the return value is the real-space energy.
pub fn accumulate_real_space(params: &EwaldParameters, registry: &mut CellList) -> f64 {
    let geometry = *registry.geometry();
    let (grid, particles) = registry.split_mut();
    let mut energy = 0.0;

    for cell in grid.interior_cells() {
        for first in grid.particles_in(cell) {
            for neighbour in grid.neighbourhood(cell) {
                for second in grid.particles_in(neighbour) {
                    let (p1, p2) = (&particles[first], &particles[second]);
                    if p1.index >= p2.index {
                        continue;
                    }

                    let r12 = geometry.separation(p2.position, p1.position);
                    let Some(pair) = pair_interaction(params, p1.orientation, p2.orientation, r12)
                    else {
                        continue;
                    };
                    energy += pair.energy;

                    let p1 = &mut particles[first];
                    add_assign(&mut p1.force, pair.force);
                    add_assign(&mut p1.torque, pair.torque_on_first);
                    let p2 = &mut particles[second];
                    sub_assign(&mut p2.force, pair.force);
                    add_assign(&mut p2.torque, pair.torque_on_second);
                }
            }
        }
    }

    energy
}
