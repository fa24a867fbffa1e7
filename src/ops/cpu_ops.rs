//! SoftPool forward kernels on host buffers.
//!
//! One unit of work per output cell. Cells are handed to `rayon` in chunks of
//! [`THREADS_PER_BLOCK`], and every cell only reads the input and writes its
//! own output slot, so no synchronization is needed.

use crate::array::Array;
use crate::dtype::Dtype;
use crate::error::Error;
use crate::geometry::{OutputCoord, PoolGeometry, THREADS_PER_BLOCK};
use crate::safe_math::{clamp, clamp_magnitude, safe_exp, saturate};
use rayon::prelude::*;

/// Partition function of one window: `sum safe_exp(x_i)` over its valid
/// cells, kept at or above the smallest positive normal so it can divide.
#[inline]
pub(crate) fn window_weight_sum<E: Dtype, const R: usize>(
    input: &[E],
    geometry: &PoolGeometry<R>,
    coord: &OutputCoord<R>,
) -> E {
    let mut sum = E::zero();
    geometry.for_each_window_cell(coord, |i| {
        sum = saturate(sum + safe_exp(input[i]));
    });
    clamp(sum, E::min_positive_value(), E::max_value())
}

/// Normalized weight of a cell with value `x` in a window with `weight_sum`.
///
/// Weights of one window sum to 1 unless the weight sum saturated at `MAX`,
/// in which case every saturated cell gets weight 1.
#[inline]
pub(crate) fn normalized_weight<E: Dtype>(x: E, weight_sum: E) -> E {
    clamp_magnitude(safe_exp(x) / weight_sum, E::zero(), E::max_value())
}

#[inline]
fn soft_pool_cell<E: Dtype, const R: usize>(
    input: &[E],
    geometry: &PoolGeometry<R>,
    output_index: usize,
) -> E {
    let coord = geometry.unravel_output(output_index);
    let weight_sum = window_weight_sum(input, geometry, &coord);
    let mut acc = E::zero();
    geometry.for_each_window_cell(&coord, |i| {
        let x = input[i];
        let contribution = saturate(normalized_weight(x, weight_sum) * x);
        acc = saturate(acc + contribution);
    });
    acc
}

/// Rank-generic forward launcher.
///
/// `input` holds `geometry.input_len()` elements and `output`
/// `geometry.output_len()`; every output element is overwritten.
pub fn soft_pool_forward<E: Dtype, const R: usize>(
    input: &[E],
    geometry: &PoolGeometry<R>,
    output: &mut [E],
) -> Result<(), Error> {
    geometry.check_input_len(input.len())?;
    geometry.check_output_len(output.len())?;
    if output.is_empty() {
        return Ok(());
    }

    debug_println!(
        "soft_pool{}d forward: input {:?}, kernel {:?}, stride {:?}, {} cells in {} blocks",
        R,
        geometry.input_shape(),
        geometry.kernel,
        geometry.stride,
        output.len(),
        output.len().div_ceil(THREADS_PER_BLOCK)
    );

    output
        .par_chunks_mut(THREADS_PER_BLOCK)
        .enumerate()
        .for_each(|(block, cells)| {
            let first = block * THREADS_PER_BLOCK;
            for (lane, out) in cells.iter_mut().enumerate() {
                *out = soft_pool_cell(input, geometry, first + lane);
            }
        });

    debug_println!("soft_pool{}d forward complete", R);
    Ok(())
}

/// 1D forward over `[batch, channels, dim]`.
pub fn soft_pool1d_forward<E: Dtype>(
    input: &[E],
    batch: usize,
    channels: usize,
    dim: usize,
    kernel: usize,
    stride: usize,
    output: &mut [E],
) -> Result<(), Error> {
    let geometry = PoolGeometry::new(batch, channels, [dim], [kernel], [stride])?;
    soft_pool_forward(input, &geometry, output)
}

/// 2D forward over `[batch, channels, height, width]`.
pub fn soft_pool2d_forward<E: Dtype>(
    input: &[E],
    batch: usize,
    channels: usize,
    (height, width): (usize, usize),
    (k_h, k_w): (usize, usize),
    (s_h, s_w): (usize, usize),
    output: &mut [E],
) -> Result<(), Error> {
    let geometry = PoolGeometry::new(batch, channels, [height, width], [k_h, k_w], [s_h, s_w])?;
    soft_pool_forward(input, &geometry, output)
}

/// 3D forward over `[batch, channels, depth, height, width]`.
pub fn soft_pool3d_forward<E: Dtype>(
    input: &[E],
    batch: usize,
    channels: usize,
    (depth, height, width): (usize, usize, usize),
    (k_d, k_h, k_w): (usize, usize, usize),
    (s_d, s_h, s_w): (usize, usize, usize),
    output: &mut [E],
) -> Result<(), Error> {
    let geometry = PoolGeometry::new(
        batch,
        channels,
        [depth, height, width],
        [k_d, k_h, k_w],
        [s_d, s_h, s_w],
    )?;
    soft_pool_forward(input, &geometry, output)
}

/// Forward pass over an owned [`Array`] shaped `[N, C, spatial...]`.
pub fn soft_pool<E: Dtype, const R: usize>(
    input: &Array<E>,
    kernel: [usize; R],
    stride: [usize; R],
) -> Result<Array<E>, Error> {
    let geometry = PoolGeometry::from_input_shape(input.shape(), kernel, stride)?;
    let mut output = Array::zeros(&geometry.output_shape());
    soft_pool_forward(input.as_slice()?, &geometry, output.as_slice_mut()?)?;
    Ok(output)
}

/// Normalized weights of one output cell's window, as `(input offset, weight)`.
pub fn window_weights<E: Dtype, const R: usize>(
    input: &[E],
    geometry: &PoolGeometry<R>,
    output_index: usize,
) -> Result<Vec<(usize, E)>, Error> {
    geometry.check_input_len(input.len())?;
    if output_index >= geometry.output_len() {
        return Err(Error::InvalidOperation(format!(
            "output index {} out of range for {} output cells",
            output_index,
            geometry.output_len()
        )));
    }
    let coord = geometry.unravel_output(output_index);
    let weight_sum = window_weight_sum(input, geometry, &coord);
    let mut weights = Vec::new();
    geometry.for_each_window_cell(&coord, |i| {
        weights.push((i, normalized_weight(input[i], weight_sum)));
    });
    Ok(weights)
}
