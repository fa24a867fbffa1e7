// tests/ops_cpu_tests.rs
use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use softpool::ops::{self, cpu_backward, cpu_ops};
use softpool::{Array, Backend, CpuBackend, Error, PoolGeometry};

fn cpu(data: Vec<f32>, shape: &[usize]) -> Array {
    CpuBackend::from_vec(data, shape).expect("Failed to create CPU storage")
}

/// Sequential f64 reference: unguarded softmax pooling over the centred
/// windows, plus the matching gradient scatter.
fn reference_1d(
    input: &[f32],
    planes: usize,
    dim: usize,
    kernel: usize,
    stride: usize,
    grad_output: &[f32],
) -> (Vec<f64>, Vec<f64>) {
    let out_dim = dim / stride;
    let mut output = vec![0.0f64; planes * out_dim];
    let mut grad_input = vec![0.0f64; planes * dim];
    for p in 0..planes {
        for po in 0..out_dim {
            let cells: Vec<usize> = (0..kernel)
                .filter_map(|o| (po * stride + o).checked_sub(kernel / 2))
                .filter(|&i| i < dim)
                .map(|i| p * dim + i)
                .collect();
            let z: f64 = cells.iter().map(|&i| (input[i] as f64).exp()).sum();
            let g = grad_output[p * out_dim + po] as f64;
            for &i in &cells {
                let x = input[i] as f64;
                let w = x.exp() / z;
                output[p * out_dim + po] += w * x;
                grad_input[i] += w * g;
            }
        }
    }
    (output, grad_input)
}

#[test]
fn test_soft_pool1d_alternating_example() -> Result<(), Error> {
    let input = cpu(vec![0.0, 1.0, 0.0, 1.0], &[1, 1, 4]);
    let output = ops::soft_pool1d::<CpuBackend>(&input, 2, 2)?;
    assert_eq!(output.shape(), &[1, 1, 2]);

    // po=0 sees only cell 0; po=1 sees cells 1 and 2.
    let out = CpuBackend::copy_to_host(&output)?;
    assert_relative_eq!(out[0], 0.0, epsilon = 1e-6);
    assert_relative_eq!(out[1], 0.731_058_6, epsilon = 1e-5);

    let grad_output = cpu(vec![1.0, 1.0], &[1, 1, 2]);
    let grad_input = ops::soft_pool1d_backward::<CpuBackend>(&input, &grad_output, 2, 2)?;
    let grad = CpuBackend::copy_to_host(&grad_input)?;
    assert_eq!(grad_input.shape(), &[1, 1, 4]);
    assert_relative_eq!(grad[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(grad[1], 0.731_058_6, epsilon = 1e-5);
    assert_relative_eq!(grad[2], 0.268_941_4, epsilon = 1e-5);
    assert_relative_eq!(grad[3], 0.0, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_soft_pool1d_closed_form() -> Result<(), Error> {
    let input = cpu(vec![1.0, 2.0, 3.0, 4.0], &[1, 1, 4]);
    let out = CpuBackend::copy_to_host(&ops::soft_pool1d::<CpuBackend>(&input, 2, 2)?)?;
    // po=0 keeps only x=1; po=1 pools {2, 3}.
    let (e2, e3) = (2f64.exp(), 3f64.exp());
    assert_relative_eq!(out[0], 1.0, max_relative = 1e-6);
    assert_relative_eq!(out[1] as f64, (2.0 * e2 + 3.0 * e3) / (e2 + e3), max_relative = 1e-6);
    Ok(())
}

#[test]
fn test_soft_pool1d_overlapping_windows() -> Result<(), Error> {
    let input = cpu(vec![1.0, 2.0, 3.0, 4.0], &[1, 1, 4]);
    let output = ops::soft_pool1d::<CpuBackend>(&input, 3, 1)?;
    let out = CpuBackend::copy_to_host(&output)?;
    let expected = [1.731_058_6, 2.575_210_4, 3.575_210_4, 3.731_058_6];
    for (o, e) in out.iter().zip(expected) {
        assert_relative_eq!(*o, e, max_relative = 1e-5);
    }
    Ok(())
}

#[test]
fn test_soft_pool2d_forward() -> Result<(), Error> {
    let input = cpu((0..16).map(|v| v as f32).collect(), &[1, 1, 4, 4]);
    let output = ops::soft_pool2d::<CpuBackend>(&input, (2, 2), (2, 2))?;
    assert_eq!(output.shape(), &[1, 1, 2, 2]);
    let out = CpuBackend::copy_to_host(&output)?;
    let expected = [0.0, 1.731_058_6, 7.928_055, 9.659_114];
    for (o, e) in out.iter().zip(expected) {
        assert_relative_eq!(*o, e, epsilon = 1e-5, max_relative = 1e-5);
    }
    Ok(())
}

#[test]
fn test_soft_pool2d_full_window() -> Result<(), Error> {
    let data: Vec<f32> = (0..9).map(|i| 0.1 * i as f32 - 0.4).collect();
    let input = cpu(data, &[1, 1, 3, 3]);
    let output = ops::soft_pool2d::<CpuBackend>(&input, (3, 3), (1, 1))?;
    let out = CpuBackend::copy_to_host(&output)?;
    let expected = [
        -0.175_169_33,
        -0.121_011_67,
        -0.075_169_33,
        0.011_615_12,
        0.065_772_78,
        0.111_615_12,
        0.124_830_67,
        0.178_988_33,
        0.224_830_67,
    ];
    for (o, e) in out.iter().zip(expected) {
        assert_relative_eq!(*o, e, epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn test_soft_pool3d_constant_input() -> Result<(), Error> {
    let shape = [2, 3, 4, 5, 6];
    let input = cpu(vec![0.75; shape.iter().product()], &shape);
    let output = ops::soft_pool3d::<CpuBackend>(&input, (2, 3, 2), (2, 1, 3))?;
    assert_eq!(output.shape(), &[2, 3, 2, 5, 2]);
    for v in CpuBackend::copy_to_host(&output)? {
        assert_relative_eq!(v, 0.75, max_relative = 1e-5);
    }

    let grad_output = cpu(vec![1.0; 2 * 3 * 2 * 5 * 2], output.shape());
    let grad_input = ops::soft_pool3d_backward::<CpuBackend>(&input, &grad_output, (2, 3, 2), (2, 1, 3))?;
    assert_eq!(grad_input.shape(), &shape);
    let total: f32 = CpuBackend::copy_to_host(&grad_input)?.iter().sum();
    assert_relative_eq!(total, 120.0, max_relative = 1e-4);
    Ok(())
}

#[test]
fn test_raw_buffer_launchers_match_backend() -> Result<(), Error> {
    let data: Vec<f32> = (0..2 * 2 * 5 * 7).map(|v| ((v * 13 % 17) as f32) * 0.2 - 1.5).collect();
    let input = cpu(data.clone(), &[2, 2, 5, 7]);
    let expected = CpuBackend::copy_to_host(&ops::soft_pool2d::<CpuBackend>(&input, (3, 2), (2, 2))?)?;

    let mut output = vec![0.0f32; 2 * 2 * 2 * 3];
    cpu_ops::soft_pool2d_forward(&data, 2, 2, (5, 7), (3, 2), (2, 2), &mut output)?;
    assert_eq!(output, expected);

    let grad_output: Vec<f32> = (0..output.len()).map(|v| v as f32 * 0.1).collect();
    let grad_storage = cpu(grad_output.clone(), &[2, 2, 2, 3]);
    let expected_grad = CpuBackend::copy_to_host(&ops::soft_pool2d_backward::<CpuBackend>(
        &input,
        &grad_storage,
        (3, 2),
        (2, 2),
    )?)?;
    let mut grad_input = vec![0.0f32; data.len()];
    cpu_backward::soft_pool2d_backward(&grad_output, &data, 2, 2, (5, 7), (3, 2), (2, 2), &mut grad_input)?;
    for (a, b) in grad_input.iter().zip(&expected_grad) {
        assert_relative_eq!(*a, *b, epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn test_parallel_matches_sequential_reference() -> Result<(), Error> {
    // 6 planes of 3000 cells: several 1024-cell blocks, overlapping windows.
    let (planes, dim, kernel, stride) = (6usize, 3000usize, 5usize, 1usize);
    let input: Vec<f32> = (0..planes * dim)
        .map(|i| ((i as f32) * 0.013).sin() * 4.0)
        .collect();
    let grad_output: Vec<f32> = (0..planes * dim / stride)
        .map(|i| ((i as f32) * 0.007).cos())
        .collect();
    let (ref_out, ref_grad) = reference_1d(&input, planes, dim, kernel, stride, &grad_output);

    let mut output = vec![0.0f32; planes * dim / stride];
    cpu_ops::soft_pool1d_forward(&input, 2, 3, dim, kernel, stride, &mut output)?;
    for (i, (o, r)) in output.iter().zip(&ref_out).enumerate() {
        assert!(((*o as f64) - r).abs() < 1e-4, "forward cell {i}: {o} vs {r}");
    }

    let mut grad_input = vec![0.0f32; planes * dim];
    cpu_backward::soft_pool1d_backward(&grad_output, &input, 2, 3, dim, kernel, stride, &mut grad_input)?;
    for (i, (g, r)) in grad_input.iter().zip(&ref_grad).enumerate() {
        assert!(((*g as f64) - r).abs() < 1e-4, "grad cell {i}: {g} vs {r}");
    }
    Ok(())
}

#[test]
fn test_random_inputs_keep_weights_normalized() -> Result<(), Error> {
    let mut rng = StdRng::seed_from_u64(7);
    let geometry = PoolGeometry::new(2, 3, [6, 7, 8], [3, 2, 3], [2, 1, 2])?;
    let input: Vec<f32> = (0..geometry.input_len())
        .map(|_| rng.random_range(-20.0f32..20.0))
        .collect();

    let mut output = vec![0.0f32; geometry.output_len()];
    cpu_ops::soft_pool_forward(&input, &geometry, &mut output)?;
    for cell in 0..geometry.output_len() {
        let weights = cpu_ops::window_weights(&input, &geometry, cell)?;
        let total: f32 = weights.iter().map(|(_, w)| *w).sum();
        assert_relative_eq!(total, 1.0, max_relative = 1e-4);

        // The output is a convex combination, so it lies within the window's range.
        let (lo, hi) = weights.iter().fold((f32::MAX, f32::MIN), |(lo, hi), (i, _)| {
            (lo.min(input[*i]), hi.max(input[*i]))
        });
        assert!(output[cell] >= lo - 1e-3 && output[cell] <= hi + 1e-3);
    }

    let grad_output: Vec<f32> = (0..geometry.output_len())
        .map(|_| rng.random_range(-1.0f32..1.0))
        .collect();
    let mut grad_input = vec![0.0f32; geometry.input_len()];
    cpu_backward::soft_pool_backward(&grad_output, &input, &geometry, &mut grad_input)?;
    let total_in: f32 = grad_input.iter().sum();
    let total_out: f32 = grad_output.iter().sum();
    assert_relative_eq!(total_in, total_out, epsilon = 1e-3);
    Ok(())
}

#[test]
fn test_backward_is_repeatable_up_to_rounding() -> Result<(), Error> {
    let geometry = PoolGeometry::new(1, 4, [40, 40], [5, 5], [1, 1])?;
    let input: Vec<f32> = (0..geometry.input_len()).map(|i| (i % 11) as f32 * 0.3).collect();
    let grad_output: Vec<f32> = (0..geometry.output_len()).map(|i| (i % 7) as f32 - 3.0).collect();

    let mut first = vec![0.0f32; geometry.input_len()];
    let mut second = vec![0.0f32; geometry.input_len()];
    cpu_backward::soft_pool_backward(&grad_output, &input, &geometry, &mut first)?;
    cpu_backward::soft_pool_backward(&grad_output, &input, &geometry, &mut second)?;
    for (a, b) in first.iter().zip(&second) {
        assert_relative_eq!(*a, *b, epsilon = 1e-4, max_relative = 1e-5);
    }
    Ok(())
}

#[test]
fn test_generic_array_entry_points() -> Result<(), Error> {
    let input = Array::from_vec(vec![0.0f64, 1.0, 0.0, 1.0], &[1, 1, 4])?;
    let output = cpu_ops::soft_pool(&input, [2], [2])?;
    assert_relative_eq!(output.as_slice()?[1], 1f64.exp() / (1f64.exp() + 1.0), epsilon = 1e-12);

    let grad_output = Array::from_vec(vec![2.0f64, 2.0], &[1, 1, 2])?;
    let grad_input = cpu_backward::soft_pool_grad(&input, &grad_output, [2], [2])?;
    let total: f64 = grad_input.as_slice()?.iter().sum();
    assert_relative_eq!(total, 4.0, epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_wrong_rank_is_rejected() {
    let input = cpu(vec![0.0; 16], &[1, 1, 4, 4]);
    assert!(matches!(
        ops::soft_pool1d::<CpuBackend>(&input, 2, 2),
        Err(Error::DimensionMismatch(3, 4))
    ));
    assert!(matches!(
        ops::soft_pool3d::<CpuBackend>(&input, (2, 2, 2), (2, 2, 2)),
        Err(Error::DimensionMismatch(5, 4))
    ));
}

#[test]
fn test_zero_kernel_or_stride_is_rejected() {
    let input = cpu(vec![0.0; 8], &[1, 1, 8]);
    assert!(matches!(
        ops::soft_pool1d::<CpuBackend>(&input, 0, 2),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        ops::soft_pool1d::<CpuBackend>(&input, 2, 0),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_backward_checks_grad_output_shape() {
    let input = cpu(vec![0.0; 8], &[1, 1, 8]);
    let grad_output = cpu(vec![1.0; 3], &[1, 1, 3]);
    assert!(matches!(
        ops::soft_pool1d_backward::<CpuBackend>(&input, &grad_output, 2, 2),
        Err(Error::ShapeMismatch { .. })
    ));
}
