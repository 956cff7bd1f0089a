use std::error;
use std::fmt;

/**
 * Error to represent invalid gas states, degenerate time steps, bad
 * configuration, or a failed device kernel launch.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    NegativeGasPressure(f64),
    NegativeMassDensity(f64),
    NumericalDegeneracy { max_wave_speed: f64 },
    Misconfiguration(String),
    DeviceFailure(String),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;

        match self {
            NegativeGasPressure(p) => writeln!(fmt, "negative gas pressure: {}", p),
            NegativeMassDensity(d) => writeln!(fmt, "negative mass density: {}", d),
            NumericalDegeneracy { max_wave_speed } => writeln!(
                fmt,
                "degenerate time step: max wave speed {} yields no finite dt",
                max_wave_speed
            ),
            Misconfiguration(what) => writeln!(fmt, "misconfiguration: {}", what),
            DeviceFailure(what) => writeln!(fmt, "device execution failed: {}", what),
        }
    }
}

impl error::Error for Error {}
