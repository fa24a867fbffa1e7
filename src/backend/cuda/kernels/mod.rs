//! CUDA kernel module and the PTX produced for it by `build.rs`.

pub const SOFTPOOL_MODULE: &str = "softpool";

pub const SOFTPOOL_PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/softpool.ptx"));

pub const SOFTPOOL_KERNELS: &[&str] = &[
    "softpool1d_forward_kernel",
    "softpool2d_forward_kernel",
    "softpool3d_forward_kernel",
    "softpool1d_backward_kernel",
    "softpool2d_backward_kernel",
    "softpool3d_backward_kernel",
];

/// Kernel names `(forward, backward)` for a pooling rank.
pub fn kernel_names(rank: usize) -> Option<(&'static str, &'static str)> {
    match rank {
        1 => Some((SOFTPOOL_KERNELS[0], SOFTPOOL_KERNELS[3])),
        2 => Some((SOFTPOOL_KERNELS[1], SOFTPOOL_KERNELS[4])),
        3 => Some((SOFTPOOL_KERNELS[2], SOFTPOOL_KERNELS[5])),
        _ => None,
    }
}
