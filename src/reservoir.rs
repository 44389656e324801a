//! Reservoir forward pass.
//!
//! ```text
//! state[i]  = tanh( W_in[i,:]·input + W_x[i,:]·prior[:] )
//! extended  = [state; input]
//! output[k] = W_out[k,:]·extended
//! ```
//!
//! Pure functions: dimensions are checked by the caller.

use crate::matrix::{dot, Matrix};

/// Next reservoir state from the current input and the prior state.
pub fn update_state(w_in: &Matrix, input: &[f32], w_x: &Matrix, prior: &[f32]) -> Vec<f32> {
    debug_assert_eq!(w_in.rows(), w_x.rows());
    (0..w_in.rows())
        .map(|i| (dot(w_in.row(i), input) + dot(w_x.row(i), prior)).tanh())
        .collect()
}

/// Concatenate `[state; input]`.
pub fn extend(input: &[f32], state: &[f32]) -> Vec<f32> {
    let mut z = Vec::with_capacity(state.len() + input.len());
    z.extend_from_slice(state);
    z.extend_from_slice(input);
    z
}

pub fn readout(w_out: &Matrix, extended: &[f32]) -> Vec<f32> {
    w_out.mul_vec(extended)
}
