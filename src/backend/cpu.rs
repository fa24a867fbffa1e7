//! CPU backend implementation using `ndarray` storage and `rayon` kernels.

use crate::array::Array; // The storage type for this backend
use crate::backend::Backend;
use crate::error::Error;
use crate::geometry::PoolGeometry;
use crate::ops::cpu_backward;
use crate::ops::cpu_ops;

/// Marker struct for the CPU backend.
/// Implements the `Backend` trait over the `Array` wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Storage = Array;

    fn zeros(shape: &[usize]) -> Result<Self::Storage, Error> {
        Ok(Array::zeros(shape))
    }

    fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self::Storage, Error> {
        Array::from_vec(data, shape)
    }

    fn device(_storage: &Self::Storage) -> crate::Device {
        crate::Device::Cpu
    }

    fn shape(storage: &Self::Storage) -> &[usize] {
        storage.shape()
    }

    fn size(storage: &Self::Storage) -> usize {
        storage.size()
    }

    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f32>, Error> {
        Ok(storage.as_slice()?.to_vec())
    }

    fn soft_pool<const R: usize>(
        input: &Self::Storage,
        geometry: &PoolGeometry<R>,
    ) -> Result<Self::Storage, Error> {
        check_shape(input, geometry.input_shape())?;
        let mut output = Array::zeros(&geometry.output_shape());
        cpu_ops::soft_pool_forward(input.as_slice()?, geometry, output.as_slice_mut()?)?;
        Ok(output)
    }

    fn soft_pool_backward<const R: usize>(
        input: &Self::Storage,
        grad_output: &Self::Storage,
        geometry: &PoolGeometry<R>,
    ) -> Result<Self::Storage, Error> {
        check_shape(input, geometry.input_shape())?;
        check_shape(grad_output, geometry.output_shape())?;
        let mut grad_input = Array::zeros(input.shape());
        cpu_backward::soft_pool_backward(
            grad_output.as_slice()?,
            input.as_slice()?,
            geometry,
            grad_input.as_slice_mut()?,
        )?;
        Ok(grad_input)
    }
}

fn check_shape(storage: &Array, expected: Vec<usize>) -> Result<(), Error> {
    if storage.shape() != expected.as_slice() {
        return Err(Error::ShapeMismatch {
            expected,
            actual: storage.shape().to_vec(),
        });
    }
    Ok(())
}
