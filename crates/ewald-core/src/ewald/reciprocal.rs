//! Fourier-space part of the dipolar Ewald sum.
//!
//! Pass A accumulates the structure factors
//!
//! ```text
//! S(k) = sum_i (u_i.k) sin(k.r_i)
//! C(k) = sum_i (u_i.k) cos(k.r_i)
//! ```
//!
//! over owned particles and all-reduces them across processes. Pass B uses
//! the global `S` and `C` to add force and torque to every owned particle.
//! Pass B must never run on factors from an earlier configuration.

use super::parameters::{EwaldParameters, ParameterError};
use super::trig::KrTable;
use crate::cells::CellList;
use crate::comms::{ReductionError, SumReduction};
use crate::geometry::{X, Y, Z, add_assign, cross, dot};

/// Global `S(k)` and `C(k)`, one entry per retained wavevector.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureFactors {
    sin_terms: Vec<f64>,
    cos_terms: Vec<f64>,
}

impl StructureFactors {
    pub fn with_len(len: usize) -> Result<Self, ParameterError> {
        Ok(Self {
            sin_terms: zeroed(len, "structure factor S(k)")?,
            cos_terms: zeroed(len, "structure factor C(k)")?,
        })
    }

    pub fn len(&self) -> usize {
        self.sin_terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sin_terms.is_empty()
    }

    pub fn sin_terms(&self) -> &[f64] {
        &self.sin_terms
    }

    pub fn cos_terms(&self) -> &[f64] {
        &self.cos_terms
    }

    fn clear(&mut self) {
        self.sin_terms.fill(0.0);
        self.cos_terms.fill(0.0);
    }
}

fn zeroed(len: usize, what: &'static str) -> Result<Vec<f64>, ParameterError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| ParameterError::Allocation { what, len })?;
    buffer.resize(len, 0.0);
    Ok(buffer)
}

/// Pass A: local structure factors, then the collective sum. Every process
/// must reach this call for the reduction to complete.
pub fn accumulate_structure_factors<R>(
    params: &EwaldParameters,
    table: &mut KrTable,
    factors: &mut StructureFactors,
    registry: &CellList,
    reduction: &mut R,
) -> Result<(), ReductionError>
where
    R: SumReduction + ?Sized,
{
    factors.clear();
    let box_length = params.box_length;

    let grid = registry.grid();
    let particles = registry.particles();

    for cell in grid.interior_cells() {
        for slot in grid.particles_in(cell) {
            let particle = &particles[slot];
            table.fill(particle.position, box_length);
            for (kn, wavevector) in params.wavevectors().iter().enumerate() {
                let udotk = dot(particle.orientation, wavevector.k);
                let (sin_kr, cos_kr) = table.sin_cos(wavevector.n);
                factors.sin_terms[kn] += udotk * sin_kr;
                factors.cos_terms[kn] += udotk * cos_kr;
            }
        }
    }

    reduction.sum_in_place(&mut factors.sin_terms)?;
    reduction.sum_in_place(&mut factors.cos_terms)?;
    Ok(())
}

/// Reciprocal energy from already reduced structure factors. Terms on the
/// `n_z = 0` plane carry half weight since both `k` and `-k` are listed.
pub fn fourier_energy(params: &EwaldParameters, factors: &StructureFactors) -> f64 {
    params
        .wavevectors()
        .iter()
        .enumerate()
        .map(|(kn, wavevector)| {
            let magnitude_sq = factors.sin_terms[kn].powi(2) + factors.cos_terms[kn].powi(2);
            if wavevector.is_mirrored() {
                wavevector.influence * magnitude_sq
            } else {
                0.5 * wavevector.influence * magnitude_sq
            }
        })
        .sum()
}

/// Pass B: add reciprocal force and torque to owned particles.
///
/// `energy` is reset at the start of each owned particle's wavevector loop
/// and re-accumulated there, so one full pass survives. With no owned
/// particles it is left as it was.
pub fn accumulate_fourier_forces(
    params: &EwaldParameters,
    table: &mut KrTable,
    factors: &StructureFactors,
    registry: &mut CellList,
    energy: &mut f64,
) {
    let box_length = params.box_length;
    let (grid, particles) = registry.split_mut();

    for cell in grid.interior_cells() {
        for slot in grid.particles_in(cell) {
            let particle = &mut particles[slot];
            table.fill(particle.position, box_length);

            let u = particle.orientation;
            let mut force = [0.0; 3];
            let mut torque = [0.0; 3];

            *energy = 0.0;
            for (kn, wavevector) in params.wavevectors().iter().enumerate() {
                let (sk, ck) = (factors.sin_terms[kn], factors.cos_terms[kn]);
                let mut b = wavevector.influence;
                if wavevector.is_mirrored() {
                    b *= 2.0;
                }
                *energy += 0.5 * b * (sk * sk + ck * ck);

                let (sin_kr, cos_kr) = table.sin_cos(wavevector.n);
                let k = wavevector.k;
                let udotk = dot(u, k);

                let along = b * udotk * (ck * sin_kr - sk * cos_kr);
                let g_scale = b * (ck * cos_kr + sk * sin_kr);
                for i in [X, Y, Z] {
                    force[i] += along * k[i];
                }
                let g = k.map(|component| g_scale * component);
                let t = cross(u, g);
                for i in [X, Y, Z] {
                    torque[i] -= t[i];
                }
            }

            add_assign(&mut particle.force, force);
            add_assign(&mut particle.torque, torque);
        }
    }
}
