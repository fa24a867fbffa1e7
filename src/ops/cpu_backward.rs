//! SoftPool backward (gradient-scatter) kernels on host buffers.
//!
//! Parallelized over output cells like the forward pass. Windows overlap
//! whenever stride < kernel, so several cells may add into the same input
//! gradient at once; every write goes through [`Dtype::atomic_add`].
//! Summation order is not deterministic.

use crate::array::Array;
use crate::dtype::Dtype;
use crate::error::Error;
use crate::geometry::{PoolGeometry, THREADS_PER_BLOCK};
use crate::ops::cpu_ops::{normalized_weight, window_weight_sum};
use crate::safe_math::saturate;
use rayon::prelude::*;

/// Rank-generic backward launcher.
///
/// Adds `grad_output[o] * w_i(o)` into `grad_input[i]` for every output cell
/// `o` and every valid cell `i` of its window. Weights are recomputed from
/// `input`, which must be the tensor given to the forward pass. `grad_input`
/// is only added to, so the caller zeroes it first.
pub fn soft_pool_backward<E: Dtype, const R: usize>(
    grad_output: &[E],
    input: &[E],
    geometry: &PoolGeometry<R>,
    grad_input: &mut [E],
) -> Result<(), Error> {
    geometry.check_output_len(grad_output.len())?;
    geometry.check_input_len(input.len())?;
    geometry.check_input_len(grad_input.len())?;
    if grad_output.is_empty() {
        return Ok(());
    }

    debug_println!(
        "soft_pool{}d backward: input {:?}, kernel {:?}, stride {:?}, {} cells",
        R,
        geometry.input_shape(),
        geometry.kernel,
        geometry.stride,
        grad_output.len()
    );

    let grad_cells = E::as_atomic_slice(grad_input)?;
    (0..grad_output.len())
        .into_par_iter()
        .with_min_len(THREADS_PER_BLOCK)
        .for_each(|output_index| {
            let coord = geometry.unravel_output(output_index);
            let weight_sum = window_weight_sum(input, geometry, &coord);
            let g = grad_output[output_index];
            geometry.for_each_window_cell(&coord, |i| {
                let scattered = saturate(normalized_weight(input[i], weight_sum) * g);
                E::atomic_add(&grad_cells[i], scattered);
            });
        });

    debug_println!("soft_pool{}d backward complete", R);
    Ok(())
}

/// 1D backward over `[batch, channels, dim]`.
#[allow(clippy::too_many_arguments)]
pub fn soft_pool1d_backward<E: Dtype>(
    grad_output: &[E],
    input: &[E],
    batch: usize,
    channels: usize,
    dim: usize,
    kernel: usize,
    stride: usize,
    grad_input: &mut [E],
) -> Result<(), Error> {
    let geometry = PoolGeometry::new(batch, channels, [dim], [kernel], [stride])?;
    soft_pool_backward(grad_output, input, &geometry, grad_input)
}

/// 2D backward over `[batch, channels, height, width]`.
#[allow(clippy::too_many_arguments)]
pub fn soft_pool2d_backward<E: Dtype>(
    grad_output: &[E],
    input: &[E],
    batch: usize,
    channels: usize,
    (height, width): (usize, usize),
    (k_h, k_w): (usize, usize),
    (s_h, s_w): (usize, usize),
    grad_input: &mut [E],
) -> Result<(), Error> {
    let geometry = PoolGeometry::new(batch, channels, [height, width], [k_h, k_w], [s_h, s_w])?;
    soft_pool_backward(grad_output, input, &geometry, grad_input)
}

/// 3D backward over `[batch, channels, depth, height, width]`.
#[allow(clippy::too_many_arguments)]
pub fn soft_pool3d_backward<E: Dtype>(
    grad_output: &[E],
    input: &[E],
    batch: usize,
    channels: usize,
    (depth, height, width): (usize, usize, usize),
    (k_d, k_h, k_w): (usize, usize, usize),
    (s_d, s_h, s_w): (usize, usize, usize),
    grad_input: &mut [E],
) -> Result<(), Error> {
    let geometry = PoolGeometry::new(
        batch,
        channels,
        [depth, height, width],
        [k_d, k_h, k_w],
        [s_d, s_h, s_w],
    )?;
    soft_pool_backward(grad_output, input, &geometry, grad_input)
}

/// Backward pass over owned arrays. Returns a fresh input gradient.
pub fn soft_pool_grad<E: Dtype, const R: usize>(
    input: &Array<E>,
    grad_output: &Array<E>,
    kernel: [usize; R],
    stride: [usize; R],
) -> Result<Array<E>, Error> {
    let geometry = PoolGeometry::from_input_shape(input.shape(), kernel, stride)?;
    let expected = geometry.output_shape();
    if grad_output.shape() != expected.as_slice() {
        return Err(Error::ShapeMismatch {
            expected,
            actual: grad_output.shape().to_vec(),
        });
    }
    let mut grad_input = Array::zeros(input.shape());
    soft_pool_backward(
        grad_output.as_slice()?,
        input.as_slice()?,
        &geometry,
        grad_input.as_slice_mut()?,
    )?;
    Ok(grad_input)
}
