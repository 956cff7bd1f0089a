use clap::Parser;
use fieldforge::device::ExecutionTarget;
use fieldforge::grid::Grid;
use fieldforge::hydro::euler::Primitive;
use fieldforge::solver::Solver;
use fieldforge::solvers::euler2d::Euler2d;
use fieldforge::thread_pool::ThreadPool;
use fieldforge::workspace::Workspace;

#[derive(Debug, Parser)]
#[clap(version = "0.1.0", about = "Gas blast wave on a structured grid")]
struct Opts {
    #[clap(short = 't', long, default_value = "1")]
    num_threads: usize,

    #[clap(short = 'n', long, default_value = "200")]
    grid_size: usize,

    #[clap(short = 's', long, default_value = "500")]
    num_steps: u64,

    #[clap(long)]
    use_device: bool,

    #[clap(long, default_value = "state.cbor")]
    outfile: String,
}

#[derive(serde::Serialize)]


/**
 * The simulation solution state
 */
struct State {
    iteration: u64,
    time: f64,
    nx: usize,
    ny: usize,
    density: Vec<f64>,
    pressure: Vec<f64>,
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

    let mut solver = Euler2d::new(&pool, &workspace, &grid, target);
    let mut config = fieldforge::config::Configuration::new();
    let node = config.create_group(config.root(), "euler");
    solver.fill_configuration_scheme(&mut config, node);
    solver.apply_configuration(&config, node).unwrap();

    // A hot circular over-pressure region in a resting ambient gas.
    solver
        .set_initial_conditions(|x, y| {
            let r2 = (x - 0.5) * (x - 0.5) + (y - 0.5) * (y - 0.5);
            let p = if r2 < 0.01 { 10.0 } else { 1.0 };
            Primitive::new(1.0, 0.0, 0.0, p)
        })
        .unwrap();

    let start = std::time::Instant::now();
    solver.calculate(opts.num_steps).unwrap();
    let elapsed = start.elapsed().as_secs_f64();

    let zones = grid.cell_count() as f64 * opts.num_steps as f64;
    println!("[{}] t={:.6}", solver.steps_taken(), solver.time());
    println!("total ................. {}s", elapsed);
    println!("Mzps .................. {}", zones / elapsed * 1e-6);

    let state = State {
        iteration: solver.steps_taken(),
        time: solver.time(),
        nx: grid.nx(),
        ny: grid.ny(),
        density: solver.density().unwrap().to_vec(),
        pressure: solver.pressure().unwrap().to_vec(),
    };
    let file = std::fs::File::create(&opts.outfile).unwrap();
    let mut buffer = std::io::BufWriter::new(file);
    ciborium::ser::into_writer(&state, &mut buffer).unwrap();
}
