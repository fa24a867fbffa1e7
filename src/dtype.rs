//! Element types accepted by the pooling kernels.
//!
//! The kernels compute in the caller's element type; there is no promotion.
//! Each type is paired with an atomic cell of the same width so the backward
//! pass can accumulate into a shared gradient buffer from many threads.

use crate::error::Error;
use crate::safe_math::saturate;
use half::{bf16, f16};
use num_traits::Float;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

pub trait Dtype: Float + Debug + Default + Send + Sync + 'static {
    /// Atomic cell with the bit width of `Self`.
    type Atomic: Send + Sync;

    /// Views an exclusively borrowed buffer as atomic cells.
    ///
    /// Fails if the buffer is not aligned for the atomic type, which can only
    /// happen for 64-bit elements on targets that align `f64` to 4 bytes.
    fn as_atomic_slice(buf: &mut [Self]) -> Result<&[Self::Atomic], Error>;

    /// Adds `val` into `cell` with a compare-and-swap loop. The stored sum is
    /// saturated, so repeated adds near `MAX` never reach infinity.
    fn atomic_add(cell: &Self::Atomic, val: Self);
}

macro_rules! impl_dtype {
    ($ty:ty, $atomic:ty) => {
        const _: () = assert!(std::mem::size_of::<$ty>() == std::mem::size_of::<$atomic>());

        impl Dtype for $ty {
            type Atomic = $atomic;

            fn as_atomic_slice(buf: &mut [Self]) -> Result<&[Self::Atomic], Error> {
                if buf.is_empty() {
                    return Ok(&[]);
                }
                if buf.as_ptr().align_offset(std::mem::align_of::<$atomic>()) != 0 {
                    return Err(Error::InvalidOperation(format!(
                        "gradient buffer is not aligned for {}",
                        stringify!($atomic)
                    )));
                }
                // SAFETY: same size (asserted above), alignment checked, and the
                // exclusive borrow rules out non-atomic access while the view lives.
                Ok(unsafe { &*(buf as *mut [$ty] as *const [$atomic]) })
            }

            #[inline]
            fn atomic_add(cell: &Self::Atomic, val: Self) {
                let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                    Some(saturate(<$ty>::from_bits(bits) + val).to_bits())
                });
            }
        }
    };
}

impl_dtype!(f16, AtomicU16);
impl_dtype!(bf16, AtomicU16);
impl_dtype!(f32, AtomicU32);
impl_dtype!(f64, AtomicU64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_add_accumulates_in_place() {
        let mut buf = vec![1.0f32, 2.0, 3.0];
        {
            let cells = f32::as_atomic_slice(&mut buf).unwrap();
            f32::atomic_add(&cells[1], 0.5);
            f32::atomic_add(&cells[1], 0.25);
            f32::atomic_add(&cells[2], -3.0);
        }
        assert_eq!(buf, vec![1.0, 2.75, 0.0]);
    }

    #[test]
    fn atomic_add_half_precision() {
        let mut buf = vec![f16::from_f32(1.0); 2];
        {
            let cells = f16::as_atomic_slice(&mut buf).unwrap();
            f16::atomic_add(&cells[0], f16::from_f32(0.5));
        }
        assert_eq!(buf[0].to_f32(), 1.5);
        assert_eq!(buf[1].to_f32(), 1.0);
    }

    #[test]
    fn atomic_add_from_many_threads() {
        let mut buf = vec![0.0f64; 1];
        {
            let cells = f64::as_atomic_slice(&mut buf).unwrap();
            std::thread::scope(|s| {
                for _ in 0..8 {
                    s.spawn(|| {
                        for _ in 0..1000 {
                            f64::atomic_add(&cells[0], 1.0);
                        }
                    });
                }
            });
        }
        assert_eq!(buf[0], 8000.0);
    }

    #[test]
    fn atomic_add_saturates_the_stored_sum() {
        let mut buf = vec![f32::MAX, -f32::MAX];
        {
            let cells = f32::as_atomic_slice(&mut buf).unwrap();
            f32::atomic_add(&cells[0], f32::MAX);
            f32::atomic_add(&cells[1], -f32::MAX);
        }
        assert_eq!(buf, vec![f32::MAX, -f32::MAX]);

        let mut half_buf = vec![f16::MAX];
        {
            let cells = f16::as_atomic_slice(&mut half_buf).unwrap();
            f16::atomic_add(&cells[0], f16::MAX);
        }
        assert_eq!(half_buf[0], f16::MAX);
    }

    #[test]
    fn empty_buffer_has_empty_view() {
        let mut buf: Vec<bf16> = Vec::new();
        assert!(bf16::as_atomic_slice(&mut buf).unwrap().is_empty());
    }
}
