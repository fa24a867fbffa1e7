//! Range-guarded arithmetic used by every step of the pooling kernels.
//!
//! Each intermediate value (exponential, sum, quotient, product) is brought
//! back into the finite range of the element type right after it is computed,
//! so overflow never turns into `inf` and never propagates into a `NaN`.

use crate::dtype::Dtype;

/// Returns -1, 0 or +1 with the sign of `x`. NaN maps to 0.
#[inline]
pub fn sign<E: Dtype>(x: E) -> E {
    if x > E::zero() {
        E::one()
    } else if x < E::zero() {
        -E::one()
    } else {
        E::zero()
    }
}

/// Plain clamp of `x` into `[lower, upper]`. A NaN input yields `lower`.
#[inline]
pub fn clamp<E: Dtype>(x: E, lower: E, upper: E) -> E {
    x.max(lower).min(upper)
}

/// Clamps `|x|` into `[lower, upper]` and restores the sign of `x`.
///
/// Negative values are bounded symmetrically instead of being pulled to
/// `lower`. Zero and NaN stay at zero.
#[inline]
pub fn clamp_magnitude<E: Dtype>(x: E, lower: E, upper: E) -> E {
    sign(x) * clamp(x.abs(), lower, upper)
}

/// `clamp_magnitude(x, 0, max)`: any value, saturated to the finite range.
#[inline]
pub fn saturate<E: Dtype>(x: E) -> E {
    clamp_magnitude(x, E::zero(), E::max_value())
}

/// `exp(x)` that never overflows to infinity.
#[inline]
pub fn safe_exp<E: Dtype>(x: E) -> E {
    saturate(x.exp())
}
