use super::parameters::EwaldParameters;
use crate::common::constants::RSQRT_PI;

/// Self-interaction correction of one dipole, `-2 mu^2 kappa^3 / (3 sqrt(pi))`.
pub fn self_energy_per_particle(params: &EwaldParameters) -> f64 {
    -2.0 * params.mu_sq() * params.kappa.powi(3) * RSQRT_PI / 3.0
}

/// Self-energy of the whole system. `global_count` is the number of
/// particles over every process, not the local share.
pub fn self_energy(params: &EwaldParameters, global_count: usize) -> f64 {
    self_energy_per_particle(params) * global_count as f64
}

#[cfg(test)]
mod tests {
    use super::{self_energy, self_energy_per_particle};
    use crate::common::EwaldConfig;
    use crate::ewald::parameters::EwaldParameters;
    use approx::assert_abs_diff_eq;

    #[test]
    fn reference_pair_self_energy() {
        let params =
            EwaldParameters::derive(EwaldConfig::new(0.285, 32.0, 64.0)).expect("valid config");
        assert_abs_diff_eq!(self_energy(&params, 2), -2.91356e-5, epsilon = 1.0e-10);
    }

    #[test]
    fn scales_linearly_with_global_count() {
        let params =
            EwaldParameters::derive(EwaldConfig::new(1.5, 6.0, 30.0)).expect("valid config");
        let single = self_energy_per_particle(&params);
        let expected = -2.0 * 1.5 * 1.5 * params.kappa.powi(3) / (3.0 * std::f64::consts::PI.sqrt());
        assert_abs_diff_eq!(single, expected, epsilon = 1.0e-15);
        assert_eq!(self_energy(&params, 0), 0.0);
        assert_abs_diff_eq!(self_energy(&params, 1000), 1000.0 * single, epsilon = 1.0e-12);
    }
}
