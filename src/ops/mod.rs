//! SoftPool entry points.
//!
//! The functions here work on any [`Backend`] storage shaped `[N, C,
//! spatial...]`. The raw-buffer kernels they delegate to on the CPU live in
//! [`cpu_ops`] (forward) and [`cpu_backward`] (backward) and accept any
//! [`Dtype`](crate::Dtype).

use crate::backend::Backend;
use crate::error::Error;
use crate::geometry::PoolGeometry;

pub mod cpu_backward;
pub mod cpu_ops;

fn pool<B: Backend, const R: usize>(
    input: &B::Storage,
    kernel: [usize; R],
    stride: [usize; R],
) -> Result<B::Storage, Error> {
    let geometry = PoolGeometry::from_input_shape(B::shape(input), kernel, stride)?;
    B::soft_pool(input, &geometry)
}

fn pool_backward<B: Backend, const R: usize>(
    input: &B::Storage,
    grad_output: &B::Storage,
    kernel: [usize; R],
    stride: [usize; R],
) -> Result<B::Storage, Error> {
    let geometry = PoolGeometry::from_input_shape(B::shape(input), kernel, stride)?;
    B::soft_pool_backward(input, grad_output, &geometry)
}

/// 1D SoftPool over `[N, C, L]`. Output is `[N, C, L / stride]`.
pub fn soft_pool1d<B: Backend>(
    input: &B::Storage,
    kernel_size: usize,
    stride: usize,
) -> Result<B::Storage, Error> {
    pool::<B, 1>(input, [kernel_size], [stride])
}

/// 2D SoftPool over `[N, C, H, W]`.
pub fn soft_pool2d<B: Backend>(
    input: &B::Storage,
    kernel_size: (usize, usize),
    stride: (usize, usize),
) -> Result<B::Storage, Error> {
    pool::<B, 2>(input, [kernel_size.0, kernel_size.1], [stride.0, stride.1])
}

/// 3D SoftPool over `[N, C, D, H, W]`.
pub fn soft_pool3d<B: Backend>(
    input: &B::Storage,
    kernel_size: (usize, usize, usize),
    stride: (usize, usize, usize),
) -> Result<B::Storage, Error> {
    pool::<B, 3>(
        input,
        [kernel_size.0, kernel_size.1, kernel_size.2],
        [stride.0, stride.1, stride.2],
    )
}

/// SoftPool gradient scatter for [`soft_pool1d`]: each `grad_output` cell is
/// spread over its window by the recomputed weights, held constant.
pub fn soft_pool1d_backward<B: Backend>(
    input: &B::Storage,
    grad_output: &B::Storage,
    kernel_size: usize,
    stride: usize,
) -> Result<B::Storage, Error> {
    pool_backward::<B, 1>(input, grad_output, [kernel_size], [stride])
}

/// SoftPool gradient scatter for [`soft_pool2d`]: each `grad_output` cell is
/// spread over its window by the recomputed weights, held constant.
pub fn soft_pool2d_backward<B: Backend>(
    input: &B::Storage,
    grad_output: &B::Storage,
    kernel_size: (usize, usize),
    stride: (usize, usize),
) -> Result<B::Storage, Error> {
    pool_backward::<B, 2>(
        input,
        grad_output,
        [kernel_size.0, kernel_size.1],
        [stride.0, stride.1],
    )
}

/// SoftPool gradient scatter for [`soft_pool3d`]: each `grad_output` cell is
/// spread over its window by the recomputed weights, held constant.
pub fn soft_pool3d_backward<B: Backend>(
    input: &B::Storage,
    grad_output: &B::Storage,
    kernel_size: (usize, usize, usize),
    stride: (usize, usize, usize),
) -> Result<B::Storage, Error> {
    pool_backward::<B, 3>(
        input,
        grad_output,
        [kernel_size.0, kernel_size.1, kernel_size.2],
        [stride.0, stride.1, stride.2],
    )
}
