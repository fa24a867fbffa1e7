//! `Backend` implementation that runs SoftPool on the GPU.

use super::context::get_global_context;
use super::kernels::kernel_names;
use super::storage::CudaStorage;
use crate::backend::Backend;
use crate::error::Error;
use crate::geometry::{LaunchDims, PoolGeometry};

use cust::launch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CudaBackend;

/// Kernel arguments shared by every SoftPool kernel: the padded 3D
/// extents, kernel and stride, in that order.
struct KernelGeometry {
    nthreads: i64,
    extents: [i32; 3],
    kernel: [i32; 3],
    stride: [i32; 3],
}

fn to_i32(value: usize, what: &str) -> Result<i32, Error> {
    i32::try_from(value).map_err(|_| {
        Error::InvalidOperation(format!("{} {} does not fit the kernel's int arguments", what, value))
    })
}

impl KernelGeometry {
    fn new<const R: usize>(geometry: &PoolGeometry<R>) -> Result<Self, Error> {
        let padded = geometry.padded_3d()?;
        let mut extents = [0i32; 3];
        let mut kernel = [0i32; 3];
        let mut stride = [0i32; 3];
        for axis in 0..3 {
            extents[axis] = to_i32(padded.extents[axis], "extent")?;
            kernel[axis] = to_i32(padded.kernel[axis], "kernel size")?;
            stride[axis] = to_i32(padded.stride[axis], "stride")?;
        }
        let nthreads = i64::try_from(geometry.output_len()).map_err(|_| {
            Error::InvalidOperation("output too large for a kernel launch".into())
        })?;
        Ok(Self {
            nthreads,
            extents,
            kernel,
            stride,
        })
    }
}

fn check_shape(storage: &CudaStorage, expected: Vec<usize>) -> Result<(), Error> {
    if storage.shape() != expected.as_slice() {
        return Err(Error::ShapeMismatch {
            expected,
            actual: storage.shape().to_vec(),
        });
    }
    Ok(())
}

fn kernels_for_rank<const R: usize>() -> Result<(&'static str, &'static str), Error> {
    kernel_names(R).ok_or_else(|| {
        Error::InvalidOperation(format!("SoftPool is defined for 1D, 2D and 3D, got {}D", R))
    })
}

impl Backend for CudaBackend {
    type Storage = CudaStorage;

    fn zeros(shape: &[usize]) -> Result<Self::Storage, Error> {
        CudaStorage::zeros(shape)
    }

    fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self::Storage, Error> {
        CudaStorage::from_slice(&data, shape)
    }

    fn device(_storage: &Self::Storage) -> crate::Device {
        // TODO: track the device ordinal once init_context accepts more than one device.
        crate::Device::Cuda(0)
    }

    fn shape(storage: &Self::Storage) -> &[usize] {
        storage.shape()
    }

    fn size(storage: &Self::Storage) -> usize {
        storage.len()
    }

    fn copy_to_host(storage: &Self::Storage) -> Result<Vec<f32>, Error> {
        storage.to_vec()
    }

    fn soft_pool<const R: usize>(
        input: &Self::Storage,
        geometry: &PoolGeometry<R>,
    ) -> Result<Self::Storage, Error> {
        let (forward_name, _) = kernels_for_rank::<R>()?;
        check_shape(input, geometry.input_shape())?;
        let mut output = CudaStorage::zeros(&geometry.output_shape())?;
        if output.is_empty() {
            return Ok(output);
        }

        let args = KernelGeometry::new(geometry)?;
        let dims = LaunchDims::for_cells(geometry.output_len());
        debug_println!(
            "[CudaBackend::soft_pool] {} grid {} block {} cells {}",
            forward_name,
            dims.grid,
            dims.block,
            args.nthreads
        );

        let ctx = get_global_context()?;
        let kernel = ctx
            .get_kernel(forward_name)
            .ok_or_else(|| Error::CudaError(format!("{} not found", forward_name)))?;
        let stream = ctx.get_stream();
        let (grid, block) = (dims.grid, dims.block);

        unsafe {
            launch!(kernel<<<grid, block, 0, stream>>>(
                input.as_ptr(),
                output.as_mut_ptr(),
                args.nthreads,
                args.extents[0], args.extents[1], args.extents[2],
                args.kernel[0], args.kernel[1], args.kernel[2],
                args.stride[0], args.stride[1], args.stride[2]
            ))?;
        }
        stream.synchronize()?;
        Ok(output)
    }

    fn soft_pool_backward<const R: usize>(
        input: &Self::Storage,
        grad_output: &Self::Storage,
        geometry: &PoolGeometry<R>,
    ) -> Result<Self::Storage, Error> {
        let (_, backward_name) = kernels_for_rank::<R>()?;
        check_shape(input, geometry.input_shape())?;
        check_shape(grad_output, geometry.output_shape())?;
        let mut grad_input = CudaStorage::zeros(input.shape())?;
        if grad_output.is_empty() {
            return Ok(grad_input);
        }

        let args = KernelGeometry::new(geometry)?;
        let dims = LaunchDims::for_cells(geometry.output_len());
        debug_println!(
            "[CudaBackend::soft_pool_backward] {} grid {} block {} cells {}",
            backward_name,
            dims.grid,
            dims.block,
            args.nthreads
        );

        let ctx = get_global_context()?;
        let kernel = ctx
            .get_kernel(backward_name)
            .ok_or_else(|| Error::CudaError(format!("{} not found", backward_name)))?;
        let stream = ctx.get_stream();
        let (grid, block) = (dims.grid, dims.block);

        unsafe {
            launch!(kernel<<<grid, block, 0, stream>>>(
                grad_output.as_ptr(),
                input.as_ptr(),
                grad_input.as_mut_ptr(),
                args.nthreads,
                args.extents[0], args.extents[1], args.extents[2],
                args.kernel[0], args.kernel[1], args.kernel[2],
                args.stride[0], args.stride[1], args.stride[2]
            ))?;
        }
        stream.synchronize()?;
        Ok(grad_input)
    }
}
