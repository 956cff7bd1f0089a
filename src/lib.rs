//! Fieldforge advances discretized physical fields forward in time on a
//! fixed structured 2D grid. It ships two independent explicit solvers, a
//! compressible-gas finite-volume solver built on the Rusanov flux and an
//! Ez-mode electromagnetic FDTD solver, both driven by the same
//! barrier-synchronized SPMD thread pool and both able to run either in host
//! memory or through an offloaded device compute path. The grid, the named
//! field workspace, and the configuration tree are shared contracts the
//! solvers consume rather than own.

pub mod config;
pub mod device;
pub mod error;
pub mod grid;
pub mod hydro;
pub mod solver;
pub mod solvers;
pub mod thread_pool;
pub mod workspace;
