//! Ewald summation for point magnetic dipoles in a cubic periodic box.
//!
//! Conducting boundary conditions at infinity. The interaction is split
//! into a screened real-space pair sum, a reciprocal-space sum over a
//! half space of wavevectors and a constant self-energy correction.

pub mod parameters;
pub mod real_space;
pub mod reciprocal;
pub mod self_energy;
pub mod trig;

pub use parameters::{EwaldParameters, ParameterError, Wavevector};
pub use real_space::{PairInteraction, pair_interaction, real_space_pair_energy};
pub use reciprocal::StructureFactors;
pub use self_energy::{self_energy, self_energy_per_particle};
pub use trig::KrTable;

use crate::cells::CellList;
use crate::common::EwaldConfig;
use crate::comms::SumReduction;
use crate::domain::{EnergyReport, EwaldResult};
use crate::geometry::Vec3;
use tracing::{debug, info, info_span};

/// Per-process state of an enabled Ewald sum: derived constants, scratch
/// buffers sized once at initialisation and the cached energies of the
/// last sum.
#[derive(Debug, Clone)]
pub struct EwaldContext {
    params: EwaldParameters,
    factors: StructureFactors,
    table: KrTable,
    real_energy: f64,
    fourier_energy: f64,
}

impl EwaldContext {
    pub fn new(config: EwaldConfig) -> EwaldResult<Self> {
        let params = EwaldParameters::derive(config)?;
        let factors = StructureFactors::with_len(params.retained_terms())?;
        let table = KrTable::with_terms(params.max_term_count())?;

        info!(
            real_cutoff = params.real_cutoff,
            kappa = params.kappa,
            dipole_moment = params.dipole_moment,
            self_energy_per_particle = self_energy_per_particle(&params),
            term_count = params.max_term_count(),
            max_wavevector_sq = params.kmax_sq,
            retained_terms = params.retained_terms(),
            "initialised dipolar Ewald sum"
        );

        Ok(Self {
            params,
            factors,
            table,
            real_energy: 0.0,
            fourier_energy: 0.0,
        })
    }

    pub fn parameters(&self) -> &EwaldParameters {
        &self.params
    }

    pub fn structure_factors(&self) -> &StructureFactors {
        &self.factors
    }
}

/// The Ewald module as the rest of a simulation sees it.
///
/// A disabled module accepts every call: sums do nothing and energies are
/// zero, so callers never need to check [`DipoleEwald::is_enabled`].
#[derive(Debug, Clone, Default)]
pub struct DipoleEwald {
    context: Option<EwaldContext>,
}

impl DipoleEwald {
    pub fn disabled() -> Self {
        Self { context: None }
    }

    pub fn init(config: EwaldConfig) -> EwaldResult<Self> {
        Ok(Self {
            context: Some(EwaldContext::new(config)?),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> Option<&EwaldContext> {
        self.context.as_ref()
    }

    pub fn parameters(&self) -> Option<&EwaldParameters> {
        self.context.as_ref().map(EwaldContext::parameters)
    }

    /// Real-space sum followed by both reciprocal passes. Forces and torques
    /// are added to the registry's accumulators.
    pub fn sum<R>(&mut self, registry: &mut CellList, reduction: &mut R) -> EwaldResult<()>
    where
        R: SumReduction + ?Sized,
    {
        if !self.is_enabled() {
            return Ok(());
        }
        let _span = info_span!("ewald_sum", rank = reduction.rank()).entered();
        self.real_space_sum(registry);
        self.fourier_space_sum(registry, reduction)
    }

    pub fn real_space_sum(&mut self, registry: &mut CellList) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        context.real_energy = real_space::accumulate_real_space(&context.params, registry);
        debug!(energy = context.real_energy, "real-space sum");
    }

    /// Structure factors, the collective reduction, then force and torque on
    /// owned particles. Every process must call this together.
    pub fn fourier_space_sum<R>(
        &mut self,
        registry: &mut CellList,
        reduction: &mut R,
    ) -> EwaldResult<()>
    where
        R: SumReduction + ?Sized,
    {
        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };
        let EwaldContext {
            params,
            factors,
            table,
            fourier_energy,
            ..
        } = context;

        reciprocal::accumulate_structure_factors(params, table, factors, registry, reduction)?;
        reciprocal::accumulate_fourier_forces(params, table, factors, registry, fourier_energy);
        debug!(energy = *fourier_energy, "reciprocal-space sum");
        Ok(())
    }

    /// Reciprocal energy of the current configuration without touching forces.
    /// Collective, like [`DipoleEwald::fourier_space_sum`]; the cached energy
    /// reported by [`DipoleEwald::total_energy`] is not updated.
    pub fn fourier_space_energy<R>(
        &mut self,
        registry: &CellList,
        reduction: &mut R,
    ) -> EwaldResult<f64>
    where
        R: SumReduction + ?Sized,
    {
        let Some(context) = self.context.as_mut() else {
            return Ok(0.0);
        };
        reciprocal::accumulate_structure_factors(
            &context.params,
            &mut context.table,
            &mut context.factors,
            registry,
            reduction,
        )?;
        Ok(reciprocal::fourier_energy(&context.params, &context.factors))
    }

    /// Real-space energy of a single pair with `r12 = r1 - r2`.
    pub fn real_space_energy(&self, u1: Vec3, u2: Vec3, r12: Vec3) -> f64 {
        self.parameters()
            .map_or(0.0, |params| real_space_pair_energy(params, u1, u2, r12))
    }

    pub fn self_energy(&self, global_count: usize) -> f64 {
        self.parameters()
            .map_or(0.0, |params| self_energy(params, global_count))
    }

    /// Cached real and reciprocal energies of the last sum plus the self
    /// energy for `global_count` particles.
    pub fn total_energy(&self, global_count: usize) -> EnergyReport {
        match &self.context {
            Some(context) => EnergyReport {
                real: context.real_energy,
                fourier: context.fourier_energy,
                self_energy: self_energy(&context.params, global_count),
            },
            None => EnergyReport::ZERO,
        }
    }

    /// Release the scratch buffers and disable the module.
    pub fn finish(&mut self) {
        if self.context.take().is_some() {
            debug!("dipolar Ewald sum finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DipoleEwald;
    use crate::cells::CellList;
    use crate::common::EwaldConfig;
    use crate::comms::SingleProcess;
    use crate::domain::{DipoleParticle, EnergyReport, EwaldErrorCategory};
    use crate::geometry::PeriodicBox;

    fn registry_with_pair() -> CellList {
        let geometry = PeriodicBox::cubic(64.0).expect("valid box");
        let mut registry = CellList::whole_box(geometry, [3, 3, 3]).expect("valid grid");
        registry
            .insert(DipoleParticle::new(1, [3.0, 3.0, 3.0], [0.0, 0.0, 1.0]))
            .expect("insert");
        registry
            .insert(DipoleParticle::new(2, [3.0, 3.0, 13.0], [0.0, 0.0, -1.0]))
            .expect("insert");
        registry
    }

    #[test]
    fn disabled_module_is_a_no_op() {
        let mut ewald = DipoleEwald::disabled();
        let mut registry = registry_with_pair();
        assert!(!ewald.is_enabled());

        ewald
            .sum(&mut registry, &mut SingleProcess)
            .expect("disabled sum never fails");
        assert!(registry.owned().all(|p| p.force == [0.0; 3] && p.torque == [0.0; 3]));
        assert_eq!(ewald.total_energy(2), EnergyReport::ZERO);
        assert_eq!(
            ewald
                .fourier_space_energy(&registry, &mut SingleProcess)
                .expect("disabled"),
            0.0
        );
        assert_eq!(ewald.real_space_energy([0.0, 0.0, 1.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn invalid_config_is_fatal_input_error() {
        let error = DipoleEwald::init(EwaldConfig::new(0.285, -2.0, 64.0))
            .expect_err("negative cutoff must fail");
        assert_eq!(error.category(), EwaldErrorCategory::InputValidationError);
        assert_eq!(error.placeholder(), "EWALD.REAL_CUTOFF");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn total_energy_adds_up_and_finish_resets() {
        let mut ewald = DipoleEwald::init(EwaldConfig::new(0.285, 32.0, 64.0)).expect("init");
        let mut registry = registry_with_pair();
        ewald.sum(&mut registry, &mut SingleProcess).expect("sum");

        let report = ewald.total_energy(2);
        assert!(report.real > 0.0 && report.fourier > 0.0 && report.self_energy < 0.0);
        assert_eq!(
            report.total(),
            report.real + report.fourier + report.self_energy
        );

        ewald.finish();
        assert!(!ewald.is_enabled());
        assert_eq!(ewald.total_energy(2), EnergyReport::ZERO);
        ewald.finish();
    }

    #[test]
    fn scratch_buffers_keep_their_size() {
        let mut ewald = DipoleEwald::init(EwaldConfig::new(0.285, 32.0, 64.0)).expect("init");
        let mut registry = registry_with_pair();
        for _ in 0..3 {
            ewald.sum(&mut registry, &mut SingleProcess).expect("sum");
        }
        let context = ewald.context().expect("enabled");
        assert_eq!(context.structure_factors().len(), 152);
        assert_eq!(context.table.len(), 5);
    }
}
