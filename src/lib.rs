//! SoftPool: exponentially weighted pooling for 1D, 2D and 3D data.
//!
//! Every output cell is the softmax-weighted sum of its input window:
//! `out = sum_j x_j * exp(x_j) / sum_i exp(x_i)`. The backward pass scatters
//! the output gradient back into the window with the same weights, recomputed
//! from the saved input.
//!
//! This crate provides:
//! - Raw-buffer kernels for any [`Dtype`] (`f32`, `f64`, `f16`, `bf16`)
//! - A `Backend` abstraction with a CPU (`rayon`) and a CUDA implementation
//! - Overflow/underflow guards on every arithmetic step
//!
//! # Features
//! - `cuda` - Enables the CUDA backend (requires the CUDA toolkit)
//! - `serialization` - `serde` support for [`Array`]
//! - `debug_logs` - Emits launch diagnostics through the `log` facade
//!
//! # Example
//! ```rust
//! use softpool::{ops, Array, CpuBackend};
//!
//! fn main() -> Result<(), softpool::Error> {
//!     // [batch = 1, channels = 1, dim = 4]
//!     let input = Array::from_vec(vec![0.0f32, 1.0, 0.0, 1.0], &[1, 1, 4])?;
//!     let pooled = ops::soft_pool1d::<CpuBackend>(&input, 2, 2)?;
//!     assert_eq!(pooled.shape(), &[1, 1, 2]);
//!
//!     let grad_output = Array::from_vec(vec![1.0f32, 1.0], &[1, 1, 2])?;
//!     let grad_input = ops::soft_pool1d_backward::<CpuBackend>(&input, &grad_output, 2, 2)?;
//!     assert_eq!(grad_input.shape(), &[1, 1, 4]);
//!     Ok(())
//! }
//! ```

// --- Central debug_println macro definition ---
/// Conditional logging macro. Logs at debug level if 'debug_logs' feature is enabled.
#[cfg(feature = "debug_logs")]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        ::log::debug!(target: module_path!(), $($arg)*)
    };
}

/// Conditional logging macro (disabled version). Does nothing.
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {};
}

// Declare the modules within the crate
pub mod array;
pub mod backend;
pub mod dtype;
pub mod error;
pub mod geometry;
pub mod ops;
pub mod safe_math;

pub mod test_utils;

/// Represents the device where a storage's data resides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU device
    Cpu,
    /// CUDA GPU device with a specific device ID
    #[cfg(feature = "cuda")]
    Cuda(u32),
}

// Re-export the public types for easier use by consumers of the library
pub use array::Array;
pub use backend::cpu::CpuBackend;
#[cfg(feature = "cuda")]
pub use backend::cuda::CudaBackend;
pub use backend::Backend;
pub use dtype::Dtype;
pub use error::Error;
pub use geometry::{LaunchDims, OutputCoord, PoolGeometry};
