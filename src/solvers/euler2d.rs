use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::debug;

use crate::config::{Configuration, NodeId};
use crate::device::{DeviceContext, ExecutionTarget};
use crate::error::Error;
use crate::grid::{Face, Grid};
use crate::hydro::euler::{self, Conserved, Primitive};
use crate::solver::Solver;
use crate::thread_pool::{ThreadPool, WorkRange};
use crate::workspace::{FieldBuffer, MemoryLocation, Workspace};

/// Double-buffered primitive fields: generation `step % 2` is read, the
/// other generation is written, and the roles swap on the next step.
struct Fields {
    rho: [Arc<FieldBuffer>; 2],
    u: [Arc<FieldBuffer>; 2],
    v: [Arc<FieldBuffer>; 2],
    p: [Arc<FieldBuffer>; 2],
}

/**
 * First-order finite-volume solver for the 2D Euler equations of gas
 * dynamics on a structured grid, using the Rusanov numerical flux and a
 * CFL-bound adaptive time step recomputed every step. Work is statically
 * row-partitioned across the pool's contexts; the single barrier per step
 * separates the update of the next generation from the reads of the
 * following step. Cells at the domain boundary use themselves as the
 * missing neighbor, which closes the domain reflectively without any
 * special case in the flux loop.
 */
pub struct Euler2d<'a> {
    pool: &'a ThreadPool,
    workspace: &'a Workspace,
    grid: &'a Grid,
    target: ExecutionTarget,
    device: DeviceContext,
    cfl: f64,
    gamma: f64,
    fields: Option<Fields>,
    steps_taken: AtomicU64,
    time: AtomicU64,
    last_dt: AtomicU64,
    status: Mutex<Option<Error>>,
}

// ============================================================================
impl<'a> Euler2d<'a> {
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
            cfl: 0.1,
            gamma: 1.4,
            fields: None,
            steps_taken: AtomicU64::new(0),
            time: AtomicU64::new(0f64.to_bits()),
            last_dt: AtomicU64::new(0f64.to_bits()),
            status: Mutex::new(None),
        }
    }

    pub fn time(&self) -> f64 {
        f64::from_bits(self.time.load(Ordering::Relaxed))
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken.load(Ordering::Relaxed)
    }

    /// The generation index holding the most recently completed state.
    pub fn current_generation(&self) -> usize {
        (self.steps_taken() % 2) as usize
    }

    pub fn density(&self) -> Option<Arc<FieldBuffer>> {
        self.fields
            .as_ref()
            .map(|f| f.rho[self.current_generation()].clone())
    }

    pub fn pressure(&self) -> Option<Arc<FieldBuffer>> {
        self.fields
            .as_ref()
            .map(|f| f.p[self.current_generation()].clone())
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    /// Fill the current generation from a model returning the primitive
    /// state at a cell center. Must run after `apply_configuration` and
    /// before any step.
    pub fn set_initial_conditions<M>(&self, model: M) -> Result<(), Error>
    where
        M: Fn(f64, f64) -> Primitive,
    {
        let fields = self.configured()?;
        let gen = self.current_generation();
        for i in 0..self.grid.cell_count() {
            let (x, y) = self.grid.cell_center(i);
            let prim = model(x, y);
            if !(prim.mass_density() > 0.0 && prim.mass_density().is_finite()) {
                return Err(Error::Misconfiguration(format!(
                    "initial density {} at ({}, {})",
                    prim.mass_density(),
                    x,
                    y
                )));
            }
            if !(prim.gas_pressure() >= 0.0 && prim.gas_pressure().is_finite()) {
                return Err(Error::Misconfiguration(format!(
                    "initial pressure {} at ({}, {})",
                    prim.gas_pressure(),
                    x,
                    y
                )));
            }
            fields.rho[gen].set(i, prim.mass_density());
            fields.u[gen].set(i, prim.velocity_1());
            fields.v[gen].set(i, prim.velocity_2());
            fields.p[gen].set(i, prim.gas_pressure());
        }
        Ok(())
    }

    /// Advance the fields by `steps` time steps, driving the whole pool.
    /// Stops at the first error; a degenerate time step or a failed device
    /// launch leaves the last completed generation intact.
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

    fn finish_step(&self, step: u64, dt: f64, began: Instant) {
        let t = f64::from_bits(self.time.load(Ordering::Relaxed)) + dt;
        self.time.store(t.to_bits(), Ordering::Relaxed);
        self.last_dt.store(dt.to_bits(), Ordering::Relaxed);
        self.steps_taken.store(step + 1, Ordering::Relaxed);
        debug!(
            "step {} completed in {:.3e}s, dt = {:.6e}, t = {:.6e}",
            step,
            began.elapsed().as_secs_f64(),
            dt,
            t
        );
    }

    fn step_once(
        &self,
        step: u64,
        thread_id: usize,
        num_threads: usize,
        fields: &Fields,
    ) -> Result<f64, Error> {
        let began = Instant::now();
        let cur = (step % 2) as usize;
        let next = 1 - cur;

        match self.target {
            ExecutionTarget::Host => {
                // Every context arrives at the same dt (or the same
                // degeneracy) through the reduction, so an early return here
                // is uniform across contexts and skips the barrier on all of
                // them alike.
                let dt = self
                    .calculate_dt(thread_id, num_threads, fields, cur)
                    .map_err(|e| self.record(e))?;
                self.advance_rows(thread_id, num_threads, fields, cur, next, dt);
                self.pool.barrier();
                if thread_id == 0 {
                    self.finish_step(step, dt, began);
                }
                Ok(dt)
            }
            ExecutionTarget::Device => {
                if thread_id == 0 {
                    match self.step_device(fields, cur, next) {
                        Ok(dt) => self.finish_step(step, dt, began),
                        Err(error) => {
                            self.record(error);
                        }
                    }
                }
                self.pool.barrier();
                if let Some(error) = self.status.lock().unwrap().clone() {
                    return Err(error);
                }
                Ok(f64::from_bits(self.last_dt.load(Ordering::Relaxed)))
            }
        }
    }

    /// Phase one of a step: every context takes the maximum wave speed over
    /// its own rows, the maxima are combined across contexts, and only then
    /// is dt derived from the global maximum, so every context returns the
    /// same dt.
    fn calculate_dt(
        &self,
        thread_id: usize,
        num_threads: usize,
        fields: &Fields,
        cur: usize,
    ) -> Result<f64, Error> {
        let nx = self.grid.nx();
        let rows = WorkRange::split(self.grid.ny(), thread_id, num_threads);

        let mut max_speed = 0.0f64;
        for y in rows.iter() {
            for x in 0..nx {
                let i = y * nx + x;
                max_speed = max_speed.max(self.cell_signal_speed(fields, cur, i));
            }
        }
        let global_speed = self.pool.reduce_max(thread_id, max_speed);
        self.derive_dt(global_speed)
    }

    fn derive_dt(&self, global_speed: f64) -> Result<f64, Error> {
        let dt = self.cfl * self.grid.min_edge_length() / global_speed;
        if dt.is_finite() && dt > 0.0 {
            Ok(dt)
        } else {
            Err(Error::NumericalDegeneracy {
                max_wave_speed: global_speed,
            })
        }
    }

    fn cell_signal_speed(&self, fields: &Fields, gen: usize, i: usize) -> f64 {
        self.cell_primitive(fields, gen, i).max_signal_speed(self.gamma)
    }

    fn cell_primitive(&self, fields: &Fields, gen: usize, i: usize) -> Primitive {
        Primitive::new(
            fields.rho[gen].get(i),
            fields.u[gen].get(i),
            fields.v[gen].get(i),
            fields.p[gen].get(i),
        )
    }

    fn advance_rows(
        &self,
        thread_id: usize,
        num_threads: usize,
        fields: &Fields,
        cur: usize,
        next: usize,
        dt: f64,
    ) {
        let nx = self.grid.nx();
        let rows = WorkRange::split(self.grid.ny(), thread_id, num_threads);
        for y in rows.iter() {
            for x in 0..nx {
                self.update_cell(fields, cur, next, y * nx + x, dt);
            }
        }
    }

    /// One cell of the finite-volume update: accumulate the Rusanov flux
    /// over the four faces, apply `q -= dt / area * flux`, and write the
    /// primitives of the next generation. Shared verbatim between the host
    /// rows and the device kernel so the two paths cannot drift apart.
    fn update_cell(&self, fields: &Fields, cur: usize, next: usize, i: usize, dt: f64) {
        let pc = self.cell_primitive(fields, cur, i);
        let mut flux = Conserved(0.0, 0.0, 0.0, 0.0);

        for face in Face::ALL {
            let j = self.grid.neighbor_cell(i, face);
            let pn = self.cell_primitive(fields, cur, j);
            let face_flux = euler::face_flux(&pc, &pn, self.grid.edge_normal(i, face), self.gamma);
            flux = flux + face_flux * self.grid.edge_length(i, face);
        }

        let q = pc.to_conserved(self.gamma) - flux * (dt / self.grid.cell_area());

        let rho = q.mass_density();
        let u = q.momentum_1() / rho;
        let v = q.momentum_2() / rho;
        let e = q.energy_density() / rho;
        let p = (e - 0.5 * (u * u + v * v)) * (self.gamma - 1.0) * rho;

        fields.rho[next].set(i, rho);
        fields.u[next].set(i, u);
        fields.v[next].set(i, v);
        fields.p[next].set(i, p);
    }

    /// Device variant of one step: a dt-reduction kernel and an update
    /// kernel, issued by the leader context only, over device-resident
    /// generations of the same fields.
    fn step_device(&self, fields: &Fields, cur: usize, next: usize) -> Result<f64, Error> {
        let cells = self.grid.cell_count();

        let mut max_speed = 0.0f64;
        self.device.launch("euler_2d_calculate_dt", || {
            for i in 0..cells {
                max_speed = max_speed.max(self.cell_signal_speed(fields, cur, i));
            }
        })?;
        let dt = self.derive_dt(max_speed)?;

        self.device.launch("euler_2d_next_time_step", || {
            for i in 0..cells {
                self.update_cell(fields, cur, next, i, dt);
            }
        })?;
        Ok(dt)
    }
}

// ============================================================================
impl<'a> Solver for Euler2d<'a> {
    fn fill_configuration_scheme(&self, config: &mut Configuration, node: NodeId) {
        config.create_node(node, "cfl", 0.1);
        config.create_node(node, "gamma", 1.4);
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
        let gamma = config.value_of(config.child_named(node, "gamma").ok_or_else(|| {
            Error::Misconfiguration("missing \"gamma\" node".to_string())
        })?)?;

        if !(cfl > 0.0 && cfl <= 1.0) {
            return Err(Error::Misconfiguration(format!(
                "cfl must lie in (0, 1], got {}",
                cfl
            )));
        }
        if !(gamma > 1.0) {
            return Err(Error::Misconfiguration(format!(
                "gamma law index must exceed 1, got {}",
                gamma
            )));
        }
        self.cfl = cfl;
        self.gamma = gamma;

        let location = match self.target {
            ExecutionTarget::Host => MemoryLocation::Host,
            ExecutionTarget::Device => MemoryLocation::Device,
        };
        let cells = self.grid.cell_count();
        let workspace = self.workspace;
        let make = |name: &str| -> Result<[Arc<FieldBuffer>; 2], Error> {
            Ok([
                workspace.create_field(&format!("{}_0", name), location, 1, cells)?,
                workspace.create_field(&format!("{}_1", name), location, 1, cells)?,
            ])
        };
        let fields = Fields {
            rho: make("rho")?,
            u: make("u")?,
            v: make("v")?,
            p: make("p")?,
        };
        self.fields = Some(fields);
        Ok(())
    }

    fn solve(&self, step: u64, thread_id: usize, num_threads: usize) -> Result<f64, Error> {
        let fields = self.configured()?;
        self.step_once(step, thread_id, num_threads, fields)
    }
}
