use std::ops::{Add, Div, Mul, Sub};

use crate::error::Error;

// ============================================================================
/// Conservative gas state `(rho, rho u, rho v, rho E)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Conserved(pub f64, pub f64, pub f64, pub f64);

/// Primitive gas state `(rho, u, v, p)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Primitive(pub f64, pub f64, pub f64, pub f64);

// ============================================================================
impl Conserved {
    pub fn mass_density(&self) -> f64 {
        self.0
    }

    pub fn momentum_1(&self) -> f64 {
        self.1
    }

    pub fn momentum_2(&self) -> f64 {
        self.2
    }

    pub fn energy_density(&self) -> f64 {
        self.3
    }

    pub fn momentum_squared(&self) -> f64 {
        self.1 * self.1 + self.2 * self.2
    }

    pub fn to_primitive(&self, gamma_law_index: f64) -> Result<Primitive, Error> {
        let ek = 0.5 * self.momentum_squared() / self.mass_density();
        let et = self.energy_density() - ek;
        let pg = et * (gamma_law_index - 1.0);
        let v1 = self.momentum_1() / self.mass_density();
        let v2 = self.momentum_2() / self.mass_density();

        if self.mass_density() < 0.0 {
            Err(Error::NegativeMassDensity(self.mass_density()))
        } else if pg < 0.0 {
            Err(Error::NegativeGasPressure(pg))
        } else {
            Ok(Primitive(self.mass_density(), v1, v2, pg))
        }
    }

    /// Rotate the momentum components into the face-local frame whose first
    /// axis is the given outward unit normal.
    pub fn rotate_to_face(&self, normal: (f64, f64)) -> Self {
        let (nx, ny) = normal;
        Self(
            self.0,
            self.1 * nx + self.2 * ny,
            -self.1 * ny + self.2 * nx,
            self.3,
        )
    }

    /// Inverse of `rotate_to_face`.
    pub fn rotate_from_face(&self, normal: (f64, f64)) -> Self {
        let (nx, ny) = normal;
        Self(
            self.0,
            self.1 * nx - self.2 * ny,
            self.1 * ny + self.2 * nx,
            self.3,
        )
    }
}

// ============================================================================
impl Primitive {
    pub fn new(rho: f64, u: f64, v: f64, p: f64) -> Self {
        Self(rho, u, v, p)
    }

    pub fn mass_density(&self) -> f64 {
        self.0
    }

    pub fn velocity_1(&self) -> f64 {
        self.1
    }

    pub fn velocity_2(&self) -> f64 {
        self.2
    }

    pub fn gas_pressure(&self) -> f64 {
        self.3
    }

    pub fn velocity_squared(&self) -> f64 {
        self.1 * self.1 + self.2 * self.2
    }

    pub fn sound_speed_squared(&self, gamma_law_index: f64) -> f64 {
        gamma_law_index * self.gas_pressure() / self.mass_density()
    }

    pub fn sound_speed(&self, gamma_law_index: f64) -> f64 {
        self.sound_speed_squared(gamma_law_index).sqrt()
    }

    /// Specific total energy `E = p / ((gamma - 1) rho) + (u^2 + v^2) / 2`.
    pub fn specific_total_energy(&self, gamma_law_index: f64) -> f64 {
        self.gas_pressure() / ((gamma_law_index - 1.0) * self.mass_density())
            + 0.5 * self.velocity_squared()
    }

    /// The largest of `|u ± a|`, `|v ± a|`; the per-cell contribution to the
    /// CFL bound.
    pub fn max_signal_speed(&self, gamma_law_index: f64) -> f64 {
        let a = self.sound_speed(gamma_law_index);
        let su = (self.1 + a).abs().max((self.1 - a).abs());
        let sv = (self.2 + a).abs().max((self.2 - a).abs());
        su.max(sv)
    }

    pub fn to_conserved(&self, gamma_law_index: f64) -> Conserved {
        let d = self.mass_density();
        Conserved(
            d,
            d * self.velocity_1(),
            d * self.velocity_2(),
            d * self.specific_total_energy(gamma_law_index),
        )
    }

    /// Rotate the velocity components into the face-local frame whose first
    /// axis is the given outward unit normal.
    pub fn rotate_to_face(&self, normal: (f64, f64)) -> Self {
        let (nx, ny) = normal;
        Self(
            self.0,
            self.1 * nx + self.2 * ny,
            -self.1 * ny + self.2 * nx,
            self.3,
        )
    }

    /// Physical flux through a face, evaluated in the face-local frame where
    /// `velocity_1` is the face-normal component:
    /// `F = (rho U, rho U^2 + p, rho U V, U (rho E + p))`.
    pub fn flux_vector(&self, gamma_law_index: f64) -> Conserved {
        let d = self.mass_density();
        let u = self.velocity_1();
        let v = self.velocity_2();
        let p = self.gas_pressure();
        let rho_e = d * self.specific_total_energy(gamma_law_index);

        Conserved(d * u, d * u * u + p, d * u * v, u * (rho_e + p))
    }
}

// ============================================================================
impl Add<Conserved> for Conserved {
    type Output = Conserved;
    fn add(self, u: Self) -> Conserved {
        Conserved(self.0 + u.0, self.1 + u.1, self.2 + u.2, self.3 + u.3)
    }
}

impl Sub<Conserved> for Conserved {
    type Output = Self;
    fn sub(self, u: Self) -> Self {
        Self(self.0 - u.0, self.1 - u.1, self.2 - u.2, self.3 - u.3)
    }
}

impl Mul<f64> for Conserved {
    type Output = Self;
    fn mul(self, a: f64) -> Self {
        Self(self.0 * a, self.1 * a, self.2 * a, self.3 * a)
    }
}

impl Div<f64> for Conserved {
    type Output = Self;
    fn div(self, a: f64) -> Self {
        Self(self.0 / a, self.1 / a, self.2 / a, self.3 / a)
    }
}

// ============================================================================
/// The local Lax-Friedrichs signal-speed bound: the larger in magnitude of
/// the two extremal wave speeds on either side of the face. Inputs are
/// face-frame primitives.
pub fn max_interface_speed(pc: &Primitive, pn: &Primitive, gamma_law_index: f64) -> f64 {
    let ac = pc.sound_speed(gamma_law_index);
    let an = pn.sound_speed(gamma_law_index);
    let splus = 0f64.max(pc.velocity_1() + ac).max(pn.velocity_1() + an);
    let sminus = 0f64.min(pc.velocity_1() - ac).min(pn.velocity_1() - an);
    splus.max(-sminus)
}

/// Rusanov face flux in the face-local frame:
/// `F = (F_c + F_n) / 2 - s_max / 2 * (Q_n - Q_c)`, a centred flux with
/// enough added viscosity to stabilize the scheme.
pub fn rusanov_flux(pc: &Primitive, pn: &Primitive, gamma_law_index: f64) -> Conserved {
    let fc = pc.flux_vector(gamma_law_index);
    let fn_ = pn.flux_vector(gamma_law_index);
    let qc = pc.to_conserved(gamma_law_index);
    let qn = pn.to_conserved(gamma_law_index);
    let s = max_interface_speed(pc, pn, gamma_law_index);

    (fc + fn_) * 0.5 - (qn - qc) * (s * 0.5)
}

/// Rusanov flux through a face with the given outward normal, evaluated from
/// global-frame primitives and returned in the global frame.
pub fn face_flux(
    pc: &Primitive,
    pn: &Primitive,
    normal: (f64, f64),
    gamma_law_index: f64,
) -> Conserved {
    let flux = rusanov_flux(
        &pc.rotate_to_face(normal),
        &pn.rotate_to_face(normal),
        gamma_law_index,
    );
    flux.rotate_from_face(normal)
}
