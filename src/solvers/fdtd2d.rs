use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::config::{Configuration, NodeId};
use crate::device::{DeviceContext, ExecutionTarget};
use crate::error::Error;
use crate::grid::Grid;
use crate::solver::Solver;
use crate::thread_pool::{ThreadPool, WorkRange};
use crate::workspace::{FieldBuffer, MemoryLocation, Workspace};

/// Speed of light in metres per second.
pub const C0: f64 = 299_792_458.0;

/// Boundary treatment of one side of the domain: either the field wraps
/// around to the opposite side, or the missing neighbor reads as zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryCondition {
    Dirichlet,
    Periodic,
}

/// Point sources resolved to cell indices, immutable after configuration.
struct SourcesHolder {
    frequencies: Vec<f64>,
    cells: Vec<usize>,
}

// ============================================================================
impl SourcesHolder {
    fn new() -> Self {
        Self {
            frequencies: Vec::new(),
            cells: Vec::new(),
        }
    }

    fn append_source(&mut self, frequency: f64, cell: usize) {
        self.frequencies.push(frequency);
        self.cells.push(cell);
    }

    fn len(&self) -> usize {
        self.cells.len()
    }

    /// Time-harmonic drive injected into `dz` at `cell`, summed over every
    /// source assigned to that cell.
    fn drive(&self, cell: usize, t: f64) -> f64 {
        let mut value = 0.0;
        for (i, &source_cell) in self.cells.iter().enumerate() {
            if source_cell == cell {
                value += (2.0 * PI * self.frequencies[i] * t).sin();
            }
        }
        value
    }
}

struct Fields {
    ez: Arc<FieldBuffer>,
    dz: Arc<FieldBuffer>,
    hx: Arc<FieldBuffer>,
    hy: Arc<FieldBuffer>,
    er: Arc<FieldBuffer>,
    mh: Arc<FieldBuffer>,
    device_er: Option<Arc<FieldBuffer>>,
    device_mh: Option<Arc<FieldBuffer>>,
}

// ============================================================================
impl Fields {
    /// The permittivity table read by the update, host or device copy
    /// depending on where the kernel runs.
    fn er_table(&self, target: ExecutionTarget) -> &FieldBuffer {
        match target {
            ExecutionTarget::Host => &self.er,
            ExecutionTarget::Device => self.device_er.as_ref().unwrap(),
        }
    }

    fn mh_table(&self, target: ExecutionTarget) -> &FieldBuffer {
        match target {
            ExecutionTarget::Host => &self.mh,
            ExecutionTarget::Device => self.device_mh.as_ref().unwrap(),
        }
    }
}

/**
 * Finite-difference time-domain solver for the Ez (transverse-magnetic)
 * mode on a structured 2D grid. `hx`, `hy`, `dz` and `ez` leapfrog in
 * place: each step first updates the magnetic components from the curl of
 * `ez`, then updates the flux density from the curl of `(hx, hy)`, injects
 * the harmonic point sources, and normalizes `ez = dz / er`. The time step
 * is fixed at configuration time from the CFL bound `dt = cfl * min_len /
 * c0`. Two barriers per step keep the cross-row curl reads behind the
 * writes that produced them.
 */
pub struct Fdtd2d<'a> {
    pool: &'a ThreadPool,
    workspace: &'a Workspace,
    grid: &'a Grid,
    target: ExecutionTarget,
    device: DeviceContext,
    left_bc: BoundaryCondition,
    bottom_bc: BoundaryCondition,
    right_bc: BoundaryCondition,
    top_bc: BoundaryCondition,
    dt: f64,
    sources: SourcesHolder,
    fields: Option<Fields>,
    steps_taken: AtomicU64,
    time: AtomicU64,
    status: Mutex<Option<Error>>,
}

// ============================================================================
impl<'a> Fdtd2d<'a> {
    pub fn new(
        pool: &'a ThreadPool,
        workspace: &'a Workspace,
        grid: &'a Grid,
        target: ExecutionTarget,
    ) -> Self {
        Self {
            pool,
            workspace,
            grid,
            target,
            device: DeviceContext::new(),
            left_bc: BoundaryCondition::Periodic,
            bottom_bc: BoundaryCondition::Periodic,
            right_bc: BoundaryCondition::Periodic,
            top_bc: BoundaryCondition::Periodic,
            dt: 0.0,
            sources: SourcesHolder::new(),
            fields: None,
            steps_taken: AtomicU64::new(0),
            time: AtomicU64::new(0f64.to_bits()),
            status: Mutex::new(None),
        }
    }

    /// Override the per-side boundary treatment. Must run before
    /// `apply_configuration`; every side defaults to periodic.
    pub fn set_boundary_conditions(
        &mut self,
        left: BoundaryCondition,
        bottom: BoundaryCondition,
        right: BoundaryCondition,
        top: BoundaryCondition,
    ) {
        self.left_bc = left;
        self.bottom_bc = bottom;
        self.right_bc = right;
        self.top_bc = top;
    }

    pub fn time(&self) -> f64 {
        f64::from_bits(self.time.load(Ordering::Relaxed))
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken.load(Ordering::Relaxed)
    }

    pub fn electric_field(&self) -> Option<Arc<FieldBuffer>> {
        self.fields.as_ref().map(|f| f.ez.clone())
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    /// Advance the fields by `steps` time steps, driving the whole pool.
    pub fn calculate(&self, steps: u64) -> Result<(), Error> {
        let fields = self.configured()?;
        let start = self.steps_taken();
        *self.status.lock().unwrap() = None;

        self.pool.execute(|thread_id, num_threads| {
            for k in 0..steps {
                if self
                    .step_once(start + k, thread_id, num_threads, fields)
                    .is_err()
                {
                    break;
                }
            }
        });

        match self.status.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn configured(&self) -> Result<&Fields, Error> {
        self.fields
            .as_ref()
            .ok_or_else(|| Error::Misconfiguration("solver is not configured".to_string()))
    }

    fn record(&self, error: Error) -> Error {
        let mut status = self.status.lock().unwrap();
        if status.is_none() {
            *status = Some(error.clone());
        }
        error
    }

    fn step_once(
        &self,
        step: u64,
        thread_id: usize,
        num_threads: usize,
        fields: &Fields,
    ) -> Result<f64, Error> {
        // Separates the leader's time advance (and the tail of the previous
        // step's update_e) from this step's reads.
        self.pool.barrier();
        if thread_id == 0 {
            let t = self.time() + self.dt;
            self.time.store(t.to_bits(), Ordering::Relaxed);
            debug!("step {} begins, t = {:.6e}", step, t);
        }

        match self.target {
            ExecutionTarget::Host => {
                self.update_h(thread_id, num_threads, fields);
                self.pool.barrier();
                self.update_e(thread_id, num_threads, fields);
                if thread_id == 0 {
                    self.steps_taken.store(step + 1, Ordering::Relaxed);
                }
                Ok(self.dt)
            }
            ExecutionTarget::Device => {
                if thread_id == 0 {
                    match self.step_device(fields) {
                        Ok(()) => self.steps_taken.store(step + 1, Ordering::Relaxed),
                        Err(error) => {
                            self.record(error);
                        }
                    }
                }
                self.pool.barrier();
                if let Some(error) = self.status.lock().unwrap().clone() {
                    return Err(error);
                }
                Ok(self.dt)
            }
        }
    }

    fn cell_index(&self, x: usize, y: usize) -> usize {
        y * self.grid.nx() + x
    }

    /// The cell above, honoring the top boundary condition. `None` reads as
    /// a zero field value.
    fn neighbor_top(&self, x: usize, y: usize) -> Option<usize> {
        if y + 1 < self.grid.ny() {
            Some(self.cell_index(x, y + 1))
        } else {
            match self.top_bc {
                BoundaryCondition::Periodic => Some(self.cell_index(x, 0)),
                BoundaryCondition::Dirichlet => None,
            }
        }
    }

    fn neighbor_right(&self, x: usize, y: usize) -> Option<usize> {
        if x + 1 < self.grid.nx() {
            Some(self.cell_index(x + 1, y))
        } else {
            match self.right_bc {
                BoundaryCondition::Periodic => Some(self.cell_index(0, y)),
                BoundaryCondition::Dirichlet => None,
            }
        }
    }

    fn neighbor_bottom(&self, x: usize, y: usize) -> Option<usize> {
        if y > 0 {
            Some(self.cell_index(x, y - 1))
        } else {
            match self.bottom_bc {
                BoundaryCondition::Periodic => Some(self.cell_index(x, self.grid.ny() - 1)),
                BoundaryCondition::Dirichlet => None,
            }
        }
    }

    fn neighbor_left(&self, x: usize, y: usize) -> Option<usize> {
        if x > 0 {
            Some(self.cell_index(x - 1, y))
        } else {
            match self.left_bc {
                BoundaryCondition::Periodic => Some(self.cell_index(self.grid.nx() - 1, y)),
                BoundaryCondition::Dirichlet => None,
            }
        }
    }

    fn field_at(buffer: &FieldBuffer, cell: Option<usize>) -> f64 {
        cell.map(|i| buffer.get(i)).unwrap_or(0.0)
    }

    /// One cell of the magnetic update: a forward-difference curl of `ez`.
    /// Shared verbatim between the host rows and the device kernel.
    fn update_h_cell(&self, fields: &Fields, mh: &FieldBuffer, i: usize) {
        let (x, y) = self.grid.cell_position(i);
        let ez = fields.ez.get(i);
        let ez_top = Self::field_at(&fields.ez, self.neighbor_top(x, y));
        let ez_right = Self::field_at(&fields.ez, self.neighbor_right(x, y));

        let curl_x = (ez_top - ez) / self.grid.dy();
        let curl_y = -(ez_right - ez) / self.grid.dx();

        fields.hx.add(i, -mh.get(i) * curl_x);
        fields.hy.add(i, -mh.get(i) * curl_y);
    }

    /// One cell of the electric update: a backward-difference curl of
    /// `(hx, hy)` into `dz`, the source drive, and the permittivity
    /// normalization.
    fn update_e_cell(&self, fields: &Fields, er: &FieldBuffer, i: usize, t: f64) {
        let (x, y) = self.grid.cell_position(i);
        let hy = fields.hy.get(i);
        let hx = fields.hx.get(i);
        let hy_left = Self::field_at(&fields.hy, self.neighbor_left(x, y));
        let hx_bottom = Self::field_at(&fields.hx, self.neighbor_bottom(x, y));

        let curl_h = (hy - hy_left) / self.grid.dx() - (hx - hx_bottom) / self.grid.dy();
        fields.dz.add(i, C0 * self.dt * curl_h);

        if self.sources.len() > 0 {
            fields.dz.add(i, self.sources.drive(i, t));
        }
        fields.ez.set(i, fields.dz.get(i) / er.get(i));
    }

    fn update_h(&self, thread_id: usize, num_threads: usize, fields: &Fields) {
        let mh = fields.mh_table(ExecutionTarget::Host);
        let range = WorkRange::split(self.grid.cell_count(), thread_id, num_threads);
        for i in range.iter() {
            self.update_h_cell(fields, mh, i);
        }
    }

    fn update_e(&self, thread_id: usize, num_threads: usize, fields: &Fields) {
        let t = self.time();
        let er = fields.er_table(ExecutionTarget::Host);
        let range = WorkRange::split(self.grid.cell_count(), thread_id, num_threads);
        for i in range.iter() {
            self.update_e_cell(fields, er, i, t);
        }
    }

    /// Device variant of one step: both field updates fused into a single
    /// kernel launch on the leader context, over the device-resident fields
    /// and the coefficient tables uploaded at configuration time.
    fn step_device(&self, fields: &Fields) -> Result<(), Error> {
        let t = self.time();
        let cells = self.grid.cell_count();
        let mh = fields.mh_table(ExecutionTarget::Device);
        let er = fields.er_table(ExecutionTarget::Device);

        self.device.launch("fdtd_2d_step", || {
            for i in 0..cells {
                self.update_h_cell(fields, mh, i);
            }
            for i in 0..cells {
                self.update_e_cell(fields, er, i, t);
            }
        })
    }
}

// ============================================================================
impl<'a> Solver for Fdtd2d<'a> {
    fn fill_configuration_scheme(&self, config: &mut Configuration, node: NodeId) {
        config.create_node(node, "cfl", 0.5);
        let scheme = config.create_scheme("source_scheme");
        config.create_node(scheme, "frequency", 1e8);
        config.create_node(scheme, "x", 0.5);
        config.create_node(scheme, "y", 0.5);
        config.create_array(node, "sources", scheme);
    }

    fn apply_configuration(&mut self, config: &Configuration, node: NodeId) -> Result<(), Error> {
        if self.fields.is_some() {
            return Err(Error::Misconfiguration(
                "solver is already configured".to_string(),
            ));
        }
        let cfl = config.value_of(config.child_named(node, "cfl").ok_or_else(|| {
            Error::Misconfiguration("missing \"cfl\" node".to_string())
        })?)?;
        if !(cfl > 0.0 && cfl <= 1.0) {
            return Err(Error::Misconfiguration(format!(
                "cfl must lie in (0, 1], got {}",
                cfl
            )));
        }
        self.dt = cfl * self.grid.min_edge_length() / C0;
        self.time.store(0f64.to_bits(), Ordering::Relaxed);
        self.steps_taken.store(0, Ordering::Relaxed);

        let sources_node = config.child_named(node, "sources").ok_or_else(|| {
            Error::Misconfiguration("missing \"sources\" array".to_string())
        })?;
        for &source in config.children_of(sources_node) {
            let read = |name: &str| -> Result<f64, Error> {
                config.value_of(config.child_named(source, name).ok_or_else(|| {
                    Error::Misconfiguration(format!("source lacks a \"{}\" node", name))
                })?)
            };
            let frequency = read("frequency")?;
            let x = read("x")?;
            let y = read("y")?;
            let cell = self.grid.cell_for_coordinates(x, y).ok_or_else(|| {
                Error::Misconfiguration(format!("source at ({}, {}) is outside the domain", x, y))
            })?;
            self.sources.append_source(frequency, cell);
        }

        let location = match self.target {
            ExecutionTarget::Host => MemoryLocation::Host,
            ExecutionTarget::Device => MemoryLocation::Device,
        };
        let cells = self.grid.cell_count();
        let ez = self.workspace.create_field("ez", location, 1, cells)?;
        let dz = self.workspace.create_field("dz", location, 1, cells)?;
        let hx = self.workspace.create_field("hx", location, 1, cells)?;
        let hy = self.workspace.create_field("hy", location, 1, cells)?;
        let er = self
            .workspace
            .create_field("er", MemoryLocation::Host, 1, cells)?;
        let hr = self
            .workspace
            .create_field("hr", MemoryLocation::Host, 1, cells)?;
        let mh = self
            .workspace
            .create_field("mh", MemoryLocation::Host, 1, cells)?;

        er.fill(1.0);
        hr.fill(1.0);
        for i in 0..cells {
            mh.set(i, C0 * self.dt / hr.get(i));
        }

        let (device_er, device_mh) = match self.target {
            ExecutionTarget::Host => (None, None),
            ExecutionTarget::Device => {
                let device_er =
                    self.workspace
                        .create_field("gpu_er", MemoryLocation::Device, 1, cells)?;
                let device_mh =
                    self.workspace
                        .create_field("gpu_mh", MemoryLocation::Device, 1, cells)?;
                self.device.upload(&er, &device_er)?;
                self.device.upload(&mh, &device_mh)?;
                (Some(device_er), Some(device_mh))
            }
        };

        self.fields = Some(Fields {
            ez,
            dz,
            hx,
            hy,
            er,
            mh,
            device_er,
            device_mh,
        });
        Ok(())
    }

    fn solve(&self, step: u64, thread_id: usize, num_threads: usize) -> Result<f64, Error> {
        let fields = self.configured()?;
        self.step_once(step, thread_id, num_threads, fields)
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{BoundaryCondition, ExecutionTarget, Fdtd2d, C0};
    use crate::config::Configuration;
    use crate::error::Error;
    use crate::grid::Grid;
    use crate::solver::Solver;
    use crate::thread_pool::ThreadPool;
    use crate::workspace::Workspace;
    use std::f64::consts::PI;

    fn configure(solver: &mut Fdtd2d, sources: &[(f64, f64, f64)]) {
        let mut config = Configuration::new();
        let node = config.create_group(config.root(), "fdtd");
        solver.fill_configuration_scheme(&mut config, node);
        let array = config.child_named(node, "sources").unwrap();
        for &(frequency, x, y) in sources {
            let item = config.append_array_item(array).unwrap();
            config
                .set_value(config.child_named(item, "frequency").unwrap(), frequency)
                .unwrap();
            config
                .set_value(config.child_named(item, "x").unwrap(), x)
                .unwrap();
            config
                .set_value(config.child_named(item, "y").unwrap(), y)
                .unwrap();
        }
        solver.apply_configuration(&config, node).unwrap();
    }

    #[test]
    fn zero_fields_without_sources_stay_exactly_zero() {
        let pool = ThreadPool::new(4);
        let workspace = Workspace::new();
        let grid = Grid::new(8, 8, 1.0, 1.0).unwrap();
        let mut solver = Fdtd2d::new(&pool, &workspace, &grid, ExecutionTarget::Host);
        configure(&mut solver, &[]);

        solver.calculate(10).unwrap();

        for name in ["ez", "hx", "hy", "dz"] {
            let field = workspace.get(name).unwrap();
            assert!(
                field.to_vec().iter().all(|&x| x == 0.0),
                "{} picked up a nonzero value",
                name
            );
        }
        assert_eq!(solver.steps_taken(), 10);
        assert!((solver.time() / (10.0 * solver.dt()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn first_step_excites_only_the_source_cell() {
        let pool = ThreadPool::new(2);
        let workspace = Workspace::new();
        let grid = Grid::new(8, 8, 1.0, 1.0).unwrap();
        let mut solver = Fdtd2d::new(&pool, &workspace, &grid, ExecutionTarget::Host);
        let frequency = 1e9;
        configure(&mut solver, &[(frequency, 0.4, 0.6)]);
        let source_cell = grid.cell_for_coordinates(0.4, 0.6).unwrap();

        solver.calculate(1).unwrap();

        // H is still zero after one step, so the curl contributes nothing
        // and the source cell carries exactly the drive at t = dt.
        let expected = (2.0 * PI * frequency * solver.dt()).sin();
        let ez = solver.electric_field().unwrap();
        for i in 0..grid.cell_count() {
            if i == source_cell {
                assert_eq!(ez.get(i), expected);
            } else {
                assert_eq!(ez.get(i), 0.0);
            }
        }
    }

    #[test]
    fn the_excitation_spreads_to_neighbors_on_later_steps() {
        let pool = ThreadPool::new(4);
        let workspace = Workspace::new();
        let grid = Grid::new(16, 16, 1.0, 1.0).unwrap();
        let mut solver = Fdtd2d::new(&pool, &workspace, &grid, ExecutionTarget::Host);
        configure(&mut solver, &[(2e9, 0.5, 0.5)]);
        let source_cell = grid.cell_for_coordinates(0.5, 0.5).unwrap();

        solver.calculate(4).unwrap();

        let ez = solver.electric_field().unwrap();
        let nonzero = (0..grid.cell_count())
            .filter(|&i| ez.get(i) != 0.0)
            .count();
        assert!(nonzero > 1, "excitation never left cell {}", source_cell);
    }

    #[test]
    fn the_time_step_follows_the_cfl_bound() {
        let pool = ThreadPool::new(1);
        let workspace = Workspace::new();
        let grid = Grid::new(10, 20, 1.0, 1.0).unwrap();
        let mut solver = Fdtd2d::new(&pool, &workspace, &grid, ExecutionTarget::Host);
        configure(&mut solver, &[]);

        assert_eq!(solver.dt(), 0.5 * grid.min_edge_length() / C0);
    }

    #[test]
    fn host_and_device_paths_agree() {
        let grid = Grid::new(12, 12, 1.0, 1.0).unwrap();
        let sources = [(1.5e9, 0.3, 0.7)];

        let host_pool = ThreadPool::new(4);
        let host_workspace = Workspace::new();
        let mut host = Fdtd2d::new(&host_pool, &host_workspace, &grid, ExecutionTarget::Host);
        configure(&mut host, &sources);
        host.calculate(6).unwrap();

        let device_pool = ThreadPool::new(4);
        let device_workspace = Workspace::new();
        let mut device =
            Fdtd2d::new(&device_pool, &device_workspace, &grid, ExecutionTarget::Device);
        configure(&mut device, &sources);
        device.calculate(6).unwrap();

        assert_eq!(host.time(), device.time());
        assert_eq!(
            host.electric_field().unwrap().to_vec(),
            device.electric_field().unwrap().to_vec()
        );
    }

    #[test]
    fn dirichlet_walls_read_a_zero_neighbor() {
        let pool = ThreadPool::new(2);
        let workspace = Workspace::new();
        let grid = Grid::new(8, 8, 1.0, 1.0).unwrap();
        let mut solver = Fdtd2d::new(&pool, &workspace, &grid, ExecutionTarget::Host);
        solver.set_boundary_conditions(
            BoundaryCondition::Dirichlet,
            BoundaryCondition::Dirichlet,
            BoundaryCondition::Dirichlet,
            BoundaryCondition::Dirichlet,
        );
        configure(&mut solver, &[(2e9, 0.5, 0.5)]);

        // The run must stay finite with closed walls.
        solver.calculate(20).unwrap();
        let ez = solver.electric_field().unwrap();
        assert!(ez.to_vec().iter().all(|x| x.is_finite()));
    }

    #[test]
    fn sources_outside_the_domain_are_a_misconfiguration() {
        let pool = ThreadPool::new(1);
        let workspace = Workspace::new();
        let grid = Grid::new(8, 8, 1.0, 1.0).unwrap();
        let mut solver = Fdtd2d::new(&pool, &workspace, &grid, ExecutionTarget::Host);

        let mut config = Configuration::new();
        let node = config.create_group(config.root(), "fdtd");
        solver.fill_configuration_scheme(&mut config, node);
        let array = config.child_named(node, "sources").unwrap();
        let item = config.append_array_item(array).unwrap();
        config
            .set_value(config.child_named(item, "x").unwrap(), 2.5)
            .unwrap();

        assert!(matches!(
            solver.apply_configuration(&config, node),
            Err(Error::Misconfiguration(_))
        ));
    }

    #[test]
    fn a_failed_device_launch_stops_the_run_with_an_error() {
        let pool = ThreadPool::new(2);
        let workspace = Workspace::new();
        let grid = Grid::new(8, 8, 1.0, 1.0).unwrap();
        let mut solver = Fdtd2d::new(&pool, &workspace, &grid, ExecutionTarget::Device);
        configure(&mut solver, &[(1e9, 0.5, 0.5)]);

        solver.calculate(2).unwrap();
        let ez_before = solver.electric_field().unwrap().to_vec();

        solver.device().inject_fault("device lost");
        assert!(matches!(
            solver.calculate(5),
            Err(Error::DeviceFailure(_))
        ));
        // The failed step left the fields untouched.
        assert_eq!(solver.steps_taken(), 2);
        assert_eq!(solver.electric_field().unwrap().to_vec(), ez_before);
    }
}
