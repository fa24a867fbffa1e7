#![cfg(feature = "serialization")] // Only compile this test module if "serialization" is enabled

use half::f16;
use softpool::ops::cpu_ops;
use softpool::{Array, Error};

#[test]
fn test_array_json_round_trip() -> Result<(), Error> {
    let array = Array::from_vec(vec![0.0f32, 1.0, 0.0, 1.0], &[1, 1, 4])?;
    let json = serde_json::to_string(&array).expect("serialize");
    let restored: Array = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored, array);
    Ok(())
}

#[test]
fn test_pooled_half_array_survives_serialization() -> Result<(), Error> {
    let input = Array::from_vec(
        (0..12).map(|v| f16::from_f32(v as f32 * 0.25)).collect(),
        &[1, 2, 6],
    )?;
    let pooled = cpu_ops::soft_pool(&input, [2], [2])?;
    let json = serde_json::to_string(&pooled).expect("serialize");
    let restored: Array<f16> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored.shape(), &[1, 2, 3]);
    assert_eq!(restored, pooled);
    Ok(())
}
