use crate::array::Array;
use crate::error::Error;
use cust::memory::{CopyDestination, DeviceBuffer, DevicePointer};

fn map_cuda_error(e: cust::error::CudaError) -> Error {
    Error::CudaError(e.to_string())
}

/// An `f32` device buffer plus its logical `[N, C, spatial...]` shape.
pub struct CudaStorage {
    data: DeviceBuffer<f32>,
    shape: Vec<usize>,
}

impl CudaStorage {
    /// Allocates an uninitialized buffer. At least one element is allocated
    /// so that empty shapes still hold a valid device pointer.
    pub fn new(shape: &[usize]) -> Result<Self, Error> {
        debug_println!("[CudaStorage::new] shape {:?}", shape);
        let size = shape.iter().product::<usize>().max(1);
        let data = unsafe { DeviceBuffer::<f32>::uninitialized(size) }.map_err(map_cuda_error)?;
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    pub fn zeros(shape: &[usize]) -> Result<Self, Error> {
        debug_println!("[CudaStorage::zeros] shape {:?}", shape);
        let size = shape.iter().product::<usize>().max(1);
        let data = DeviceBuffer::<f32>::zeroed(size).map_err(map_cuda_error)?;
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    pub fn from_slice(data: &[f32], shape: &[usize]) -> Result<Self, Error> {
        let mut storage = Self::new(shape)?;
        storage.copy_from_slice(data)?;
        Ok(storage)
    }

    pub fn from_cpu(array: &Array) -> Result<Self, Error> {
        Self::from_slice(array.as_slice()?, array.shape())
    }

    pub fn to_cpu(&self) -> Result<Array, Error> {
        Array::from_vec(self.to_vec()?, &self.shape)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of logical elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_ptr(&self) -> DevicePointer<f32> {
        self.data.as_device_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> DevicePointer<f32> {
        self.data.as_device_ptr()
    }

    pub fn copy_from_slice(&mut self, data: &[f32]) -> Result<(), Error> {
        if data.len() != self.len() {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                actual: vec![data.len()],
            });
        }
        if !data.is_empty() {
            self.data
                .index(..data.len())
                .copy_from(data)
                .map_err(map_cuda_error)?;
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<f32>, Error> {
        let len = self.len();
        let mut host_data = vec![0.0f32; len];
        if len > 0 {
            self.data
                .index(..len)
                .copy_to(&mut host_data)
                .map_err(map_cuda_error)?;
        }
        Ok(host_data)
    }
}

impl Clone for CudaStorage {
    fn clone(&self) -> Self {
        let mut new_data = unsafe { DeviceBuffer::<f32>::uninitialized(self.data.len()) }
            .expect("Failed to allocate device buffer for clone"); // Clone impl can panic
        new_data
            .copy_from(&self.data)
            .expect("Failed to copy device buffer for clone"); // Clone impl can panic
        Self {
            data: new_data,
            shape: self.shape.clone(),
        }
    }
}

impl std::fmt::Debug for CudaStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CudaStorage(shape={:?}, len={}, ptr={:?})",
            self.shape,
            self.len(),
            self.data.as_device_ptr()
        )
    }
}

impl std::fmt::Display for CudaStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CudaStorage(shape={:?})", self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cuda::{init_context, CudaContextGuard};
    use serial_test::serial;

    #[serial]
    #[test]
    fn host_round_trip_keeps_shape() -> Result<(), Error> {
        init_context(0)?;
        let _guard = CudaContextGuard::new()?;

        let data: Vec<f32> = (0..12).map(|v| v as f32 * 0.5).collect();
        let storage = CudaStorage::from_slice(&data, &[1, 3, 4])?;
        assert_eq!(storage.shape(), &[1, 3, 4]);
        assert_eq!(storage.to_vec()?, data);

        let copy = storage.clone();
        assert_eq!(copy.to_cpu()?.shape(), &[1, 3, 4]);
        Ok(())
    }

    #[serial]
    #[test]
    fn copy_from_slice_checks_length() -> Result<(), Error> {
        init_context(0)?;
        let _guard = CudaContextGuard::new()?;

        let mut storage = CudaStorage::zeros(&[2, 2])?;
        assert!(matches!(
            storage.copy_from_slice(&[1.0, 2.0, 3.0]),
            Err(Error::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
