pub mod euler2d;
pub mod fdtd2d;
