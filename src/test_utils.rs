use crate::{Backend, Error};

/// Checks an analytical backward pass against central finite differences.
///
/// The scalar being differentiated is `L(x) = sum(forward(x) * upstream)`, so
/// the analytical gradient is `backward(x, upstream)`.
///
/// # Arguments
/// * `forward`: Maps an input storage to an output storage.
/// * `backward`: Maps `(input, grad_output)` to the gradient for `input`.
/// * `input`, `shape`: Host data and shape of the point to check at.
/// * `upstream`: Host data for the upstream gradient, shaped like the output.
/// * `epsilon`: Perturbation for the finite difference (e.g. 1e-3).
/// * `tolerance`: Maximum allowed relative (or, near zero, absolute) error.
pub fn check_gradient<B, F, G>(
    forward: F,
    backward: G,
    input: &[f32],
    shape: &[usize],
    upstream: &[f32],
    epsilon: f32,
    tolerance: f32,
) -> Result<(), Error>
where
    B: Backend,
    F: Fn(&B::Storage) -> Result<B::Storage, Error>,
    G: Fn(&B::Storage, &B::Storage) -> Result<B::Storage, Error>,
{
    let x = B::from_vec(input.to_vec(), shape)?;
    let output = forward(&x)?;
    if B::size(&output) != upstream.len() {
        return Err(Error::ShapeMismatch {
            expected: B::shape(&output).to_vec(),
            actual: vec![upstream.len()],
        });
    }
    let grad_output = B::from_vec(upstream.to_vec(), B::shape(&output))?;
    let analytical = B::copy_to_host(&backward(&x, &grad_output)?)?;

    let numerical = compute_numerical_gradient::<B, F>(&forward, input, shape, upstream, epsilon)?;
    compare_gradients(&analytical, &numerical, tolerance)
}

fn weighted_loss<B, F>(forward: &F, data: Vec<f32>, shape: &[usize], upstream: &[f32]) -> Result<f64, Error>
where
    B: Backend,
    F: Fn(&B::Storage) -> Result<B::Storage, Error>,
{
    let output = B::copy_to_host(&forward(&B::from_vec(data, shape)?)?)?;
    Ok(output
        .iter()
        .zip(upstream)
        .map(|(&o, &g)| o as f64 * g as f64)
        .sum())
}

fn compute_numerical_gradient<B, F>(
    forward: &F,
    input: &[f32],
    shape: &[usize],
    upstream: &[f32],
    epsilon: f32,
) -> Result<Vec<f32>, Error>
where
    B: Backend,
    F: Fn(&B::Storage) -> Result<B::Storage, Error>,
{
    let mut numerical = Vec::with_capacity(input.len());
    for i in 0..input.len() {
        let mut data_plus = input.to_vec();
        data_plus[i] += epsilon;
        let loss_plus = weighted_loss::<B, F>(forward, data_plus, shape, upstream)?;

        let mut data_minus = input.to_vec();
        data_minus[i] -= epsilon;
        let loss_minus = weighted_loss::<B, F>(forward, data_minus, shape, upstream)?;

        // Central difference formula
        numerical.push(((loss_plus - loss_minus) / (2.0 * epsilon as f64)) as f32);
    }
    Ok(numerical)
}

/// Compares two gradients element-wise and reports the worst mismatch.
pub fn compare_gradients(analytical: &[f32], numerical: &[f32], tolerance: f32) -> Result<(), Error> {
    if analytical.len() != numerical.len() {
        return Err(Error::InternalLogicError(format!(
            "Gradient size mismatch: analytical size={}, numerical size={}",
            analytical.len(),
            numerical.len()
        )));
    }

    let mut max_rel_err = 0.0;
    let mut max_abs_err = 0.0;
    let mut max_err_idx = 0;

    for (i, (a, n)) in analytical.iter().zip(numerical.iter()).enumerate() {
        let abs_err = (a - n).abs();
        // Near zero both sides are dominated by rounding, so compare absolutely.
        let rel_err = if a.abs().max(n.abs()) > 1e-3 {
            abs_err / a.abs().max(n.abs())
        } else {
            abs_err
        };

        if rel_err > max_rel_err {
            max_rel_err = rel_err;
            max_abs_err = abs_err;
            max_err_idx = i;
        }
    }

    if max_rel_err <= tolerance {
        Ok(())
    } else {
        Err(Error::GradientCheckError {
            analytical: analytical.to_vec(),
            numerical: numerical.to_vec(),
            max_rel_error: max_rel_err,
            max_abs_error: max_abs_err,
            at_index: max_err_idx,
        })
    }
}

pub fn assert_storage_eq<B: Backend>(a: &B::Storage, b: &B::Storage) {
    let a_data = B::copy_to_host(a).unwrap();
    let b_data = B::copy_to_host(b).unwrap();
    assert_eq!(B::shape(a), B::shape(b), "Storage shapes don't match");
    for (i, (a_val, b_val)) in a_data.iter().zip(b_data.iter()).enumerate() {
        assert_eq!(
            *a_val, *b_val,
            "Values at index {i} don't match: a={a_val}, b={b_val}"
        );
    }
}

pub fn assert_storage_close<B: Backend>(a: &B::Storage, b: &B::Storage, tol: f32) {
    let a_data = B::copy_to_host(a).unwrap();
    let b_data = B::copy_to_host(b).unwrap();
    assert_eq!(B::shape(a), B::shape(b), "Storage shapes don't match");
    for (i, (a_val, b_val)) in a_data.iter().zip(b_data.iter()).enumerate() {
        assert!(
            (a_val - b_val).abs() < tol,
            "Values at index {i} aren't close enough: a={a_val}, b={b_val}, diff={}, tol={tol}",
            (a_val - b_val).abs()
        );
    }
}

/// Asserts that host values from two backends agree within `tol`, scaled by
/// the magnitude of the larger value once it exceeds 1.
pub fn assert_host_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "Lengths don't match");
    for (i, (a_val, b_val)) in a.iter().zip(b.iter()).enumerate() {
        let scale = a_val.abs().max(b_val.abs()).max(1.0);
        assert!(
            (a_val - b_val).abs() <= tol * scale,
            "Values at index {i} aren't close enough: a={a_val}, b={b_val}, tol={tol}"
        );
    }
}
