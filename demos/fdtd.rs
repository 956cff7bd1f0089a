use clap::Parser;
use fieldforge::device::ExecutionTarget;
use fieldforge::grid::Grid;
use fieldforge::solver::Solver;
use fieldforge::solvers::fdtd2d::Fdtd2d;
use fieldforge::thread_pool::ThreadPool;
use fieldforge::workspace::Workspace;

#[derive(Debug, Parser)]
#[clap(version = "0.1.0", about = "Ez-mode point source radiating on a structured grid")]
struct Opts {
    #[clap(short = 't', long, default_value = "1")]
    num_threads: usize,

    #[clap(short = 'n', long, default_value = "400")]
    grid_size: usize,

    #[clap(short = 's', long, default_value = "1000")]
    num_steps: u64,

    #[clap(short = 'f', long, default_value = "1e9")]
    frequency: f64,

    #[clap(long)]
    use_device: bool,

    #[clap(long, default_value = "fields.cbor")]
    outfile: String,
}

#[derive(serde::Serialize)]


/**
 * The electromagnetic field state
 */
struct State {
    iteration: u64,
    time: f64,
    nx: usize,
    ny: usize,
    ez: Vec<f64>,
}

// ============================================================================
fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let opts = Opts::parse();
    println!("{:?}", opts);

    let target = if opts.use_device {
        ExecutionTarget::Device
    } else {
        ExecutionTarget::Host
    };

    let pool = ThreadPool::new(opts.num_threads);
    let workspace = Workspace::new();
    let grid = Grid::new(opts.grid_size, opts.grid_size, 1.0, 1.0).unwrap();

    let mut solver = Fdtd2d::new(&pool, &workspace, &grid, target);
    let mut config = fieldforge::config::Configuration::new();
    let node = config.create_group(config.root(), "fdtd");
    solver.fill_configuration_scheme(&mut config, node);

    let sources = config.child_named(node, "sources").unwrap();
    let source = config.append_array_item(sources).unwrap();
    config
        .set_value(
            config.child_named(source, "frequency").unwrap(),
            opts.frequency,
        )
        .unwrap();

    solver.apply_configuration(&config, node).unwrap();

    let start = std::time::Instant::now();
    solver.calculate(opts.num_steps).unwrap();
    let elapsed = start.elapsed().as_secs_f64();

    let zones = grid.cell_count() as f64 * opts.num_steps as f64;
    println!("[{}] t={:.6e}", solver.steps_taken(), solver.time());
    println!("total ................. {}s", elapsed);
    println!("Mzps .................. {}", zones / elapsed * 1e-6);

    let state = State {
        iteration: solver.steps_taken(),
        time: solver.time(),
        nx: grid.nx(),
        ny: grid.ny(),
        ez: solver.electric_field().unwrap().to_vec(),
    };
    let file = std::fs::File::create(&opts.outfile).unwrap();
    let mut buffer = std::io::BufWriter::new(file);
    ciborium::ser::into_writer(&state, &mut buffer).unwrap();
}
