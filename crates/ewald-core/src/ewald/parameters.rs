use crate::common::EwaldConfig;
use crate::common::constants::{KAPPA_CUTOFF_PRODUCT, PI, PI2};
use crate::geometry::Vec3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("dipole moment must be finite and > 0, got {value}")]
    InvalidDipoleMoment { value: f64 },
    #[error("real-space cutoff must be finite and > 0, got {value}")]
    InvalidRealCutoff { value: f64 },
    #[error("box side length must be finite and > 0, got {value}")]
    InvalidBoxLength { value: f64 },
    #[error("Fourier term count {value} is not representable")]
    TermCountOverflow { value: f64 },
    #[error("failed to allocate {what} buffer of {len} values")]
    Allocation { what: &'static str, len: usize },
}

/// One retained wavevector `k = (2 pi / L) n` of the half space `n_z >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wavevector {
    pub n: [i32; 3],
    pub k: Vec3,
    pub ksq: f64,
    /// `(4 pi mu^2 / V) exp(-k^2 / 4 kappa^2) / k^2`, before Hermitian doubling.
    pub influence: f64,
}

impl Wavevector {
    /// True off the `n_z = 0` plane, where `-k` is not enumerated and this
    /// term stands for both.
    pub fn is_mirrored(&self) -> bool {
        self.n[2] > 0
    }
}

/// Constants derived once from an [`EwaldConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct EwaldParameters {
    pub dipole_moment: f64,
    pub real_cutoff: f64,
    pub box_length: f64,
    /// Splitting parameter.
    pub kappa: f64,
    /// Largest wavevector multiple retained along each axis.
    pub term_count: [usize; 3],
    /// Squared magnitude cutoff in reciprocal space.
    pub kmax_sq: f64,
    wavevectors: Vec<Wavevector>,
}

impl EwaldParameters {
    pub fn derive(config: EwaldConfig) -> Result<Self, ParameterError> {
        let EwaldConfig {
            dipole_moment,
            real_cutoff,
            box_length,
        } = config;
        if !dipole_moment.is_finite() || dipole_moment <= 0.0 {
            return Err(ParameterError::InvalidDipoleMoment {
                value: dipole_moment,
            });
        }
        if !real_cutoff.is_finite() || real_cutoff <= 0.0 {
            return Err(ParameterError::InvalidRealCutoff { value: real_cutoff });
        }
        if !box_length.is_finite() || box_length <= 0.0 {
            return Err(ParameterError::InvalidBoxLength { value: box_length });
        }

        let kappa = KAPPA_CUTOFF_PRODUCT / real_cutoff;
        let nk = term_count_for(kappa, real_cutoff, box_length)?;
        let kmax_sq = (PI2 * nk as f64 / box_length).powi(2);

        let count = count_retained_wavevectors(nk);
        let mut wavevectors = Vec::new();
        wavevectors
            .try_reserve_exact(count)
            .map_err(|_| ParameterError::Allocation {
                what: "wavevector",
                len: count,
            })?;

        let prefactor = 4.0 * PI * dipole_moment * dipole_moment / box_length.powi(3);
        let r4kappa_sq = 1.0 / (4.0 * kappa * kappa);
        wavevectors.extend(half_space_lattice(nk).map(|n| {
            let k = wavevector_of(n, box_length);
            let ksq = k[0] * k[0] + k[1] * k[1] + k[2] * k[2];
            Wavevector {
                n,
                k,
                ksq,
                influence: prefactor * (-r4kappa_sq * ksq).exp() / ksq,
            }
        }));

        Ok(Self {
            dipole_moment,
            real_cutoff,
            box_length,
            kappa,
            term_count: [nk; 3],
            kmax_sq,
            wavevectors,
        })
    }

    pub fn wavevectors(&self) -> &[Wavevector] {
        &self.wavevectors
    }

    /// Total number of retained wavevectors; the length of the structure
    /// factor buffers.
    pub fn retained_terms(&self) -> usize {
        self.wavevectors.len()
    }

    pub fn max_term_count(&self) -> usize {
        self.term_count.into_iter().max().unwrap_or(0)
    }

    pub fn volume(&self) -> f64 {
        self.box_length.powi(3)
    }

    /// `2 pi / L`, the spacing of the reciprocal lattice.
    pub fn fundamental_wavenumber(&self) -> f64 {
        PI2 / self.box_length
    }

    pub fn mu_sq(&self) -> f64 {
        self.dipole_moment * self.dipole_moment
    }
}

fn term_count_for(kappa: f64, real_cutoff: f64, box_length: f64) -> Result<usize, ParameterError> {
    let value = (kappa * kappa * real_cutoff * box_length / PI).ceil();
    if !value.is_finite() || value > i32::MAX as f64 {
        return Err(ParameterError::TermCountOverflow { value });
    }
    Ok(value as usize)
}

fn wavevector_of(n: [i32; 3], box_length: f64) -> Vec3 {
    let fundamental = PI2 / box_length;
    n.map(|component| fundamental * component as f64)
}

/// Integer multiples `n` retained for term count `nk`: `n_z` in `0..=nk`,
/// `n_y` and `n_x` in `-nk..=nk`, keeping `0 < |n|^2 <= nk^2`. The order is
/// z slowest, x fastest and is shared by every pass over the buffers.
pub fn half_space_lattice(nk: usize) -> impl Iterator<Item = [i32; 3]> {
    let nk = nk as i32;
    let limit = i64::from(nk) * i64::from(nk);
    (0..=nk)
        .flat_map(move |kz| (-nk..=nk).flat_map(move |ky| (-nk..=nk).map(move |kx| [kx, ky, kz])))
        .filter(move |n| {
            let nsq: i64 = n.iter().map(|c| i64::from(*c) * i64::from(*c)).sum();
            nsq > 0 && nsq <= limit
        })
}

pub fn count_retained_wavevectors(nk: usize) -> usize {
    half_space_lattice(nk).count()
}
