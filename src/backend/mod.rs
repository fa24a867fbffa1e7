//! Backend trait definition and module structure.

use crate::error::Error;
use crate::geometry::PoolGeometry;
use std::fmt::Debug;

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;

/// A place where `f32` storage lives and where the SoftPool kernels run.
pub trait Backend: Sized + Debug + Clone {
    type Storage: Clone + Debug;

    // --- Factory Methods (Creating Storage) ---

    /// Creates new storage filled with zeros.
    fn zeros(shape: &[usize]) -> Result<Self::Storage, Error>;
    /// Creates new storage from a flat vector and a shape.
    fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self::Storage, Error>;

    // --- Shape/Data Access ---

    /// Returns the device of the storage.
    fn device(storage: &Self::Storage) -> crate::Device;
    /// Returns the shape of the storage.
    fn shape(storage: &Self::Storage) -> &[usize];
    /// Returns the total number of elements in the storage.
    fn size(storage: &Self::Storage) -> usize;
    /// Copies the data to a flat host `Vec<f32>`.
    /// May involve device-to-host transfer for GPU storage.
    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f32>, Error>;

    // --- SoftPool ---

    /// Forward pass. `input` is shaped `geometry.input_shape()`; the result is
    /// shaped `geometry.output_shape()`.
    fn soft_pool<const R: usize>(
        input: &Self::Storage,
        geometry: &PoolGeometry<R>,
    ) -> Result<Self::Storage, Error>;

    /// Backward pass. Returns the input gradient, accumulated into a zeroed
    /// buffer with the weights recomputed from `input`.
    fn soft_pool_backward<const R: usize>(
        input: &Self::Storage,
        grad_output: &Self::Storage,
        geometry: &PoolGeometry<R>,
    ) -> Result<Self::Storage, Error>;
}
