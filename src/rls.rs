//! Online readout training with exponentially weighted recursive least
//! squares.
//!
//! One update per labeled sample, in this order (later steps use the
//! pre-update Ψ):
//!
//! ```text
//! y_pred = W_out · z
//! e      = y - y_pred
//! p      = Ψ · z
//! d      = λ + zᵗ · p
//! k      = p / d
//! W_out += e · kᵗ
//! Ψ      = (Ψ - k · (zᵗ · Ψ)) / λ
//! ```

use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::matrix::{dot, Matrix};

/// Smallest |d| accepted before an update is skipped.
pub const RLS_MIN_DENOMINATOR: f32 = 1e-6;

pub struct RlsTrainer {
    w_out: Matrix,
    psi: Matrix,
    lambda: f32,
    enabled: bool,
}

impl RlsTrainer {
    /// Zero readout, Ψ = I, training disabled.
    pub fn new(outputs: usize, extended: usize, lambda: f32) -> Self {
        Self {
            w_out: Matrix::zeros(outputs, extended),
            psi: Matrix::identity(extended),
            lambda,
            enabled: false,
        }
    }

    /// One RLS step on extended vector `z` with target `y`.
    ///
    /// No-op while disabled. A collapsed denominator leaves both matrices
    /// untouched and returns `NumericalInstability`.
    pub fn update(&mut self, z: &[f32], y: &[f32]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let y_pred = self.w_out.mul_vec(z);
        let error: Vec<f32> = y.iter().zip(&y_pred).map(|(t, p)| t - p).collect();

        let p = self.psi.mul_vec(z);
        let d = self.lambda + dot(z, &p);
        if !d.is_finite() || d.abs() < RLS_MIN_DENOMINATOR {
            warn!(denominator = d, "skipping degenerate RLS update");
            return Err(LinkError::NumericalInstability { denominator: d });
        }

        let k: Vec<f32> = p.iter().map(|v| v / d).collect();
        self.w_out.add_outer(&error, &k);

        let zt_psi = self.psi.vec_mul(z);
        let n = self.psi.cols();
        for (i, row) in self.psi.as_mut_slice().chunks_exact_mut(n).enumerate() {
            for (m, &zp) in row.iter_mut().zip(&zt_psi) {
                *m = (*m - k[i] * zp) / self.lambda;
            }
        }
        Ok(())
    }

    pub fn weights(&self) -> &Matrix {
        &self.w_out
    }

    /// Replace the readout wholesale. Ψ is kept.
    pub fn set_weights(&mut self, w_out: Matrix) {
        debug_assert_eq!(w_out.rows(), self.w_out.rows());
        debug_assert_eq!(w_out.cols(), self.w_out.cols());
        self.w_out = w_out;
        debug!("readout weights replaced");
    }

    pub fn psi(&self) -> &Matrix {
        &self.psi
    }

    pub fn lambda(&self) -> f32 {
        self.lambda
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Zero the readout, restore Ψ = I and disable training.
    pub fn reset(&mut self) {
        self.w_out.fill(0.0);
        self.psi = Matrix::identity(self.psi.rows());
        self.enabled = false;
    }
}
