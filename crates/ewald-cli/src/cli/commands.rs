use super::CliError;
use super::lattice::{Orientation, simple_cubic};
use anyhow::Context;
use ewald_core::ewald::self_energy_per_particle;
use ewald_core::geometry::add_assign;
use ewald_core::{
    CellList, DipoleEwald, DipoleParticle, EnergyReport, EwaldConfig, EwaldError,
    EwaldParameters, EwaldResult, GroupMember, PeriodicBox, Subdomain, SumReduction, ThreadGroup,
    Vec3,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, warn};

/// Slabs are cut perpendicular to x.
const DECOMPOSITION_AXIS: usize = 0;
const SETUP_PLACEHOLDER: &str = "COMMS.SETUP";

#[derive(clap::Args)]
pub(super) struct ModelArgs {
    /// Side length of the cubic periodic box
    #[arg(long)]
    box_length: f64,

    /// Magnitude of every point dipole
    #[arg(long)]
    dipole_moment: f64,

    /// Real-space cutoff radius
    #[arg(long)]
    real_cutoff: f64,
}

impl ModelArgs {
    fn config(&self) -> EwaldConfig {
        EwaldConfig::new(self.dipole_moment, self.real_cutoff, self.box_length)
    }
}

#[derive(clap::Args)]
pub(super) struct EnergyArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Dipoles per box edge; N^3 dipoles are placed on a simple cubic lattice
    #[arg(long, value_name = "N")]
    lattice: usize,

    /// Cells per box edge in the cell list
    #[arg(long, default_value_t = 3)]
    cells: usize,

    /// In-process ranks, each owning a slab of cells along x
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Dipole direction on the lattice
    #[arg(long, value_enum, default_value_t = Orientation::Z)]
    orientation: Orientation,

    /// Write the JSON energy report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the JSON energy report instead of the human summary
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
pub(super) struct ParamsArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Print parameters as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnergySummary {
    config: EwaldConfig,
    particles: usize,
    ranks: usize,
    cells: usize,
    orientation: Orientation,
    retained_terms: usize,
    energy: EnergyReport,
    total: f64,
    net_force: Vec3,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterSummary {
    config: EwaldConfig,
    kappa: f64,
    term_count: [usize; 3],
    max_wavevector_sq: f64,
    fundamental_wavenumber: f64,
    retained_terms: usize,
    volume: f64,
    self_energy_per_particle: f64,
}

impl ParameterSummary {
    fn from_parameters(params: &EwaldParameters) -> Self {
        Self {
            config: EwaldConfig::new(params.dipole_moment, params.real_cutoff, params.box_length),
            kappa: params.kappa,
            term_count: params.term_count,
            max_wavevector_sq: params.kmax_sq,
            fundamental_wavenumber: params.fundamental_wavenumber(),
            retained_terms: params.retained_terms(),
            volume: params.volume(),
            self_energy_per_particle: self_energy_per_particle(params),
        }
    }
}

pub(super) fn run_params_command(args: ParamsArgs) -> Result<i32, CliError> {
    let params = EwaldParameters::derive(args.model.config()).map_err(EwaldError::from)?;
    let summary = ParameterSummary::from_parameters(&params);

    if args.json {
        println!("{}", to_json(&summary)?);
        return Ok(0);
    }

    println!("Dipolar Ewald parameters");
    println!("  real-space cutoff:        {}", params.real_cutoff);
    println!("  kappa:                    {:.6e}", summary.kappa);
    println!("  dipole moment:            {}", params.dipole_moment);
    println!(
        "  self energy per particle: {:.6e}",
        summary.self_energy_per_particle
    );
    println!(
        "  Fourier terms per axis:   {} {} {}",
        summary.term_count[0], summary.term_count[1], summary.term_count[2]
    );
    println!("  max |k|^2:                {:.6e}", summary.max_wavevector_sq);
    println!("  retained wavevectors:     {}", summary.retained_terms);
    Ok(0)
}

/// Everything a rank needs to build its share of the system.
struct RunSetup<'a> {
    config: EwaldConfig,
    geometry: PeriodicBox,
    particles: &'a [DipoleParticle],
    ncell: [usize; 3],
}

#[derive(Debug)]
struct RankOutcome {
    owned: usize,
    global_count: usize,
    report: EnergyReport,
    net_force: Vec3,
}

pub(super) fn run_energy_command(args: EnergyArgs) -> Result<i32, CliError> {
    validate_layout(&args)?;
    let config = args.model.config();
    // reject bad parameters once, before any rank is started
    let params = EwaldParameters::derive(config).map_err(EwaldError::from)?;
    let geometry = PeriodicBox::cubic(config.box_length).map_err(EwaldError::from)?;

    let cell_width = geometry.side() / args.cells as f64;
    if cell_width < config.real_cutoff {
        warn!(
            cell_width,
            real_cutoff = config.real_cutoff,
            "cell width is below the real-space cutoff; pairs beyond one cell are skipped"
        );
    }

    let particles = simple_cubic(args.lattice, geometry.side(), args.orientation);
    let setup = RunSetup {
        config,
        geometry,
        particles: &particles,
        ncell: [args.cells / args.ranks, args.cells, args.cells],
    };
    let outcomes = run_ranks(&setup, args.ranks)?;

    // ranks without particles keep a stale reciprocal energy
    let outcome = outcomes
        .iter()
        .find(|outcome| outcome.owned > 0)
        .ok_or_else(|| anyhow::anyhow!("no rank owns any particle"))?;
    let summary = EnergySummary {
        config,
        particles: outcome.global_count,
        ranks: args.ranks,
        cells: args.cells,
        orientation: args.orientation,
        retained_terms: params.retained_terms(),
        energy: outcome.report,
        total: outcome.report.total(),
        net_force: outcome.net_force,
    };

    let json = to_json(&summary)?;
    if let Some(path) = &args.report {
        write_report(path, &json)?;
    }

    if args.json {
        println!("{json}");
    } else {
        print_energy_summary(&summary);
        if let Some(path) = &args.report {
            println!("JSON report: {}", path.display());
        }
    }
    Ok(0)
}

fn validate_layout(args: &EnergyArgs) -> Result<(), CliError> {
    if args.lattice == 0 {
        return Err(CliError::Usage(
            "Invalid lattice size '0'; expected at least one dipole per edge.".to_string(),
        ));
    }
    if args.ranks == 0 {
        return Err(CliError::Usage(
            "Invalid rank count '0'; expected a positive integer.".to_string(),
        ));
    }
    if args.cells == 0 || args.cells % args.ranks != 0 {
        return Err(CliError::Usage(format!(
            "Cell count {} must be a positive multiple of the rank count {}.",
            args.cells, args.ranks
        )));
    }
    Ok(())
}

fn run_ranks(setup: &RunSetup<'_>, ranks: usize) -> Result<Vec<RankOutcome>, CliError> {
    let members = ThreadGroup::new(ranks).map_err(EwaldError::from)?;

    thread::scope(|scope| -> Result<Vec<RankOutcome>, CliError> {
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| scope.spawn(move || run_rank(member, setup)))
            .collect();

        let mut outcomes = Vec::with_capacity(ranks);
        let mut failures = Vec::new();
        for (rank, handle) in handles.into_iter().enumerate() {
            match handle
                .join()
                .map_err(|_| anyhow::anyhow!("rank {rank} panicked during the Ewald sum"))?
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => failures.push(error),
            }
        }

        // report the rank that failed, not the peers that aborted with it
        match failures
            .into_iter()
            .min_by_key(|error| error.placeholder() == SETUP_PLACEHOLDER)
        {
            Some(error) => Err(error.into()),
            None => Ok(outcomes),
        }
    })
}

fn run_rank(mut member: GroupMember, setup: &RunSetup<'_>) -> EwaldResult<RankOutcome> {
    let local = prepare_rank(&member, setup);

    // agree on setup failures before the first collective of the sum
    let failed = member.sum_count(usize::from(local.is_err()))?;
    let (mut registry, mut ewald) = local?;
    if failed > 0 {
        return Err(EwaldError::communication(
            SETUP_PLACEHOLDER,
            format!("registry setup failed on {failed} other rank(s)"),
        ));
    }

    ewald.sum(&mut registry, &mut member)?;
    registry.fold_halo_contributions();

    let global_count = member.sum_count(registry.owned_count())?;
    let local_report = ewald.total_energy(global_count);
    let mut real = [local_report.real];
    member.sum_in_place(&mut real)?;

    let mut net_force = registry
        .particles()
        .iter()
        .fold([0.0; 3], |mut total, particle| {
            add_assign(&mut total, particle.force);
            total
        });
    member.sum_in_place(&mut net_force)?;
    ewald.finish();

    debug!(rank = member.rank(), real_energy = real[0], "rank finished");
    Ok(RankOutcome {
        owned: registry.owned_count(),
        global_count,
        report: EnergyReport {
            real: real[0],
            ..local_report
        },
        net_force,
    })
}

fn prepare_rank(member: &GroupMember, setup: &RunSetup<'_>) -> EwaldResult<(CellList, DipoleEwald)> {
    let (rank, size) = (member.rank(), member.size());
    let slab = Subdomain::slab(&setup.geometry, DECOMPOSITION_AXIS, rank, size)?;
    let mut registry = CellList::new(setup.geometry, slab, setup.ncell)?;

    for particle in setup.particles {
        if registry.owns(particle.position) {
            registry.insert(*particle)?;
        }
    }
    registry.import_halo(setup.particles)?;
    info!(
        rank,
        owned = registry.owned_count(),
        halo = registry.halo_count(),
        "rank registry ready"
    );

    let ewald = DipoleEwald::init(setup.config)?;
    Ok((registry, ewald))
}

fn print_energy_summary(summary: &EnergySummary) {
    println!(
        "Dipolar Ewald energy: {} dipoles, {} rank(s), {}^3 cells",
        summary.particles, summary.ranks, summary.cells
    );
    println!("  real space:  {:.9e}", summary.energy.real);
    println!("  reciprocal:  {:.9e}", summary.energy.fourier);
    println!("  self:        {:.9e}", summary.energy.self_energy);
    println!("  total:       {:.9e}", summary.total);
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value).context("failed to serialise report")?)
}

fn write_report(path: &Path, json: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create report directory '{}'", parent.display()))?;
    }
    fs::write(path, format!("{json}\n"))
        .with_context(|| format!("failed to write energy report '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{RunSetup, run_ranks};
    use crate::cli::lattice::{Orientation, simple_cubic};
    use ewald_core::{EwaldConfig, PeriodicBox};

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn slab_ranks_agree_with_a_single_rank() {
        let geometry = PeriodicBox::cubic(12.0).expect("valid box");
        let particles = simple_cubic(6, geometry.side(), Orientation::X);
        let config = EwaldConfig::new(1.0, 3.0, 12.0);

        let serial = run_ranks(
            &RunSetup {
                config,
                geometry,
                particles: &particles,
                ncell: [4, 4, 4],
            },
            1,
        )
        .expect("single rank");
        let split = run_ranks(
            &RunSetup {
                config,
                geometry,
                particles: &particles,
                ncell: [2, 4, 4],
            },
            2,
        )
        .expect("two ranks");

        let reference = serial[0].report;
        assert_eq!(serial[0].global_count, 216);
        assert!(reference.real != 0.0 && reference.fourier != 0.0);
        for outcome in &split {
            assert_eq!(outcome.global_count, 216);
            assert_eq!(outcome.owned, 108);
            assert_close(outcome.report.real, reference.real, 1.0e-10);
            assert_close(outcome.report.fourier, reference.fourier, 1.0e-10);
            assert_close(outcome.report.self_energy, reference.self_energy, 1.0e-12);
            for axis in 0..3 {
                assert_close(outcome.net_force[axis], 0.0, 1.0e-9);
            }
        }
    }
}
