use super::parameters::ParameterError;
use crate::common::constants::PI2;
use crate::geometry::{Vec3, X, Y, Z};
use num_complex::Complex64;

/// Per-axis tables of `cos(n theta) + i sin(n theta)` for one particle,
/// `theta = 2 pi r_axis / L`, `n = 0..=nk`.
///
/// Filled by the Chebyshev recurrence so only one `sin`/`cos` pair is
/// evaluated per axis; 3-D phases are products of the axis entries.
#[derive(Debug, Clone)]
pub struct KrTable {
    phases: [Vec<Complex64>; 3],
}

impl KrTable {
    pub fn with_terms(nk: usize) -> Result<Self, ParameterError> {
        let len = nk + 1;
        let allocate = || -> Result<Vec<Complex64>, ParameterError> {
            let mut column = Vec::new();
            column
                .try_reserve_exact(len)
                .map_err(|_| ParameterError::Allocation {
                    what: "trigonometric table",
                    len,
                })?;
            column.resize(len, Complex64::new(1.0, 0.0));
            Ok(column)
        };
        Ok(Self {
            phases: [allocate()?, allocate()?, allocate()?],
        })
    }

    pub fn len(&self) -> usize {
        self.phases[X].len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases[X].is_empty()
    }

    pub fn fill(&mut self, position: Vec3, box_length: f64) {
        for axis in [X, Y, Z] {
            let column = &mut self.phases[axis];
            let len = column.len();
            column[0] = Complex64::new(1.0, 0.0);
            if len < 2 {
                continue;
            }

            let theta = PI2 * position[axis] / box_length;
            let (sin1, cos1) = theta.sin_cos();
            column[1] = Complex64::new(cos1, sin1);
            let c2 = 2.0 * cos1;
            for n in 2..len {
                let (previous, before) = (column[n - 1], column[n - 2]);
                column[n] = Complex64::new(
                    c2 * previous.re - before.re,
                    c2 * previous.im - before.im,
                );
            }
        }
    }

    /// `exp(i k.r)` for wavevector multiple `n`; negative components use the
    /// conjugate (odd sine, even cosine).
    pub fn phase(&self, n: [i32; 3]) -> Complex64 {
        let axis_phase = |axis: usize| {
            let entry = self.phases[axis][n[axis].unsigned_abs() as usize];
            if n[axis] < 0 { entry.conj() } else { entry }
        };
        axis_phase(X) * axis_phase(Y) * axis_phase(Z)
    }

    /// `(sin(k.r), cos(k.r))` for wavevector multiple `n`.
    pub fn sin_cos(&self, n: [i32; 3]) -> (f64, f64) {
        let phase = self.phase(n);
        (phase.im, phase.re)
    }
}
