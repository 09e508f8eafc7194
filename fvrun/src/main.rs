//! Runs one of the canned finite-volume cases, serially or decomposed over threads.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use strum::IntoEnumIterator;

use fv::control::{ReloadableControls, StopFlag};
use fv::examples::{Case, CaseName, Partition};
use fv::linalg::parse_kind;
use fv::parallel::{run_parallel, Comm};

#[derive(Parser, Debug)]
#[command(name = "fvrun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Finite-volume case runner", long_about = None)]
struct Cli {
    /// Case to run; `--list` shows the choices
    #[arg(default_value = "lidDrivenCavity")]
    case: String,

    /// Cells along each direction of the case's mesh
    #[arg(short, long, default_value_t = 20)]
    cells: usize,

    /// Number of ranks, each running one slab of the mesh on its own thread
    #[arg(short, long, default_value_t = 1)]
    ranks: usize,

    /// End time replacing the case's own
    #[arg(long)]
    end_time: Option<f64>,

    /// `fvSolution`-style JSON replacing the case's solution settings; re-read when it changes
    #[arg(long)]
    solution: Option<PathBuf>,

    /// The run stops cleanly once this file exists
    #[arg(long)]
    stop_file: Option<PathBuf>,

    /// Directory the final fields are written to
    #[arg(short, long)]
    write: Option<PathBuf>,

    /// Lists the available cases and exits
    #[arg(long)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if cli.list {
        for name in CaseName::iter() {
            println!("{name}");
        }
        return Ok(());
    }
    let name: CaseName = parse_kind("case", &cli.case)?;
    let mut stop = StopFlag::new();
    if let Some(path) = &cli.stop_file {
        stop = stop.with_stop_file(path);
    }

    if cli.ranks <= 1 {
        let n_steps = run_case(&cli, name, &Partition::Serial, &stop)?;
        log::info!("End after {n_steps} steps");
        return Ok(());
    }
    let results = run_parallel(cli.ranks, |comm: Comm| {
        let rank = comm.rank();
        run_case(&cli, name, &Partition::Parallel(comm), &stop)
            .with_context(|| format!("rank {rank}"))
    });
    let n_steps = results.into_iter().collect::<anyhow::Result<Vec<_>>>()?;
    let n_steps = n_steps.first().copied().unwrap_or_default();
    log::info!("End after {n_steps} steps on {} ranks", cli.ranks);
    Ok(())
}

fn run_case(
    cli: &Cli,
    name: CaseName,
    partition: &Partition,
    stop: &StopFlag,
) -> anyhow::Result<usize> {
    let mut case = Case::new(name, cli.cells, partition)
        .with_context(|| format!("setting up {name}"))?;
    if let Some(end_time) = cli.end_time {
        case = case.with_end_time(end_time)?;
    }
    let mut controls = match &cli.solution {
        Some(path) => {
            let controls = ReloadableControls::open(path)
                .with_context(|| format!("reading {}", path.display()))?;
            case = case.with_solution(controls.current().clone());
            Some(controls)
        }
        None => None,
    };
    log::info!(
        "Running {name} on {} cells of rank {}",
        case.mesh.n_cells(),
        case.mesh.comm().rank()
    );

    let mut n_steps = 0;
    while case.step(stop)? {
        n_steps += 1;
        if let (Some(controls), Some(path)) = (&mut controls, &cli.solution) {
            // Every rank takes over the new settings at the same step.
            let modified = controls
                .reload_collectively(case.mesh.comm())
                .with_context(|| format!("re-reading {}", path.display()))?;
            if modified {
                case.solution = controls.current().clone();
            }
        }
    }
    report(&case);
    if let Some(directory) = &cli.write {
        case.write(directory)
            .with_context(|| format!("writing to {}", directory.display()))?;
    }
    Ok(n_steps)
}

/// Logs the range of the solved fields over all ranks.
fn report(case: &Case) {
    let mesh = &case.mesh;
    for name in ["T", "p"] {
        if let Some(field) = case.solver.scalar_field(name) {
            let (min, max) = (field.g_min(mesh), field.g_max(mesh));
            if mesh.comm().is_master() {
                log::info!("{name}: min = {min:e}, max = {max:e}");
            }
        }
    }
    if let Some(u) = case.solver.vector_field("U") {
        let max = u.g_max_mag(mesh);
        if mesh.comm().is_master() {
            log::info!("U: max magnitude = {max:e}");
        }
    }
}
