use crate::dtype::Dtype;
use crate::error::Error;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

use ndarray::{ArrayD, IxDyn, ShapeError};

/// Dense, row-major host buffer with a shape.
///
/// Always built in standard layout, so [`as_slice`](Array::as_slice) succeeds
/// unless the caller swapped in a non-contiguous `ndarray` through
/// [`Array::new`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct Array<E: Dtype = f32> {
    pub(crate) data: ArrayD<E>,
}

impl<E: Dtype> Array<E> {
    pub fn new(data: ArrayD<E>) -> Self {
        Self { data }
    }

    pub fn into_ndarray(self) -> ArrayD<E> {
        self.data
    }

    pub fn from_vec(data: Vec<E>, shape: &[usize]) -> Result<Self, Error> {
        let actual_len = data.len();
        let map_err = |_e: ShapeError| Error::ShapeMismatch {
            expected: shape.to_vec(),
            actual: vec![actual_len],
        };
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(map_err)?;
        Ok(Self { data: array })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), E::zero()),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the array contains no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_data(&self) -> &ArrayD<E> {
        &self.data
    }

    /// Contiguous view of the elements in row-major order.
    pub fn as_slice(&self) -> Result<&[E], Error> {
        self.data.as_slice().ok_or_else(|| {
            Error::InvalidOperation("Array is not contiguous in row-major order".to_string())
        })
    }

    pub fn as_slice_mut(&mut self) -> Result<&mut [E], Error> {
        self.data.as_slice_mut().ok_or_else(|| {
            Error::InvalidOperation("Array is not contiguous in row-major order".to_string())
        })
    }

    pub fn into_raw_vec(self) -> Vec<E> {
        self.data.into_raw_vec_and_offset().0
    }
}

impl<E: Dtype> AsRef<ArrayD<E>> for Array<E> {
    fn as_ref(&self) -> &ArrayD<E> {
        &self.data
    }
}

impl std::fmt::Display for Array<f32> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Array(shape={:?}, data={})", self.shape(), self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::bf16;

    #[test]
    fn from_vec_checks_length() {
        let err = Array::from_vec(vec![1.0f32, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch { ref expected, ref actual } if expected == &vec![2, 2] && actual == &vec![3]
        ));
    }

    #[test]
    fn zeros_are_contiguous() {
        let mut a = Array::<bf16>::zeros(&[2, 3, 4]);
        assert_eq!(a.size(), 24);
        assert!(a.as_slice().unwrap().iter().all(|v| *v == bf16::ZERO));
        a.as_slice_mut().unwrap()[5] = bf16::ONE;
        assert_eq!(a.into_raw_vec()[5], bf16::ONE);
    }

    #[test]
    fn transposed_view_is_not_contiguous() {
        let a = Array::from_vec((0..6).map(|v| v as f32).collect(), &[2, 3]).unwrap();
        let t = Array::new(a.into_ndarray().reversed_axes());
        assert!(matches!(t.as_slice(), Err(Error::InvalidOperation(_))));
    }
}
