//! Reference fixed-point forward pass.
//!
//! This is the integer algorithm the emitted `predict` routine reproduces
//! bit for bit:
//!
//! 1. `input[j] = (pixel * SCALE) / 255`
//! 2. `hidden[i] = max(0, bias_hidden[i] + Σ (input[j] * w[j][i]) / SCALE)`
//! 3. `output[i] = bias_output[i] + Σ (hidden[j] * w[j][i]) / SCALE`
//! 4. first index of the maximum output
//!
//! Every division truncates toward zero and is applied to each product on its
//! own, never to the finished sum. All arithmetic is `i64`; [`check_headroom`]
//! proves that no product or partial sum can leave that range.

use tracing::debug;

use crate::error::{ModelkitError, Result};
use crate::model::QuantizedModel;
use crate::quantize::QuantizedTensor;

/// Largest raw sensor sample.
pub const PIXEL_MAX: i64 = 255;

/// Map a raw sample in `[0, 255]` into the fixed-point domain.
#[inline]
pub fn normalize(pixel: u8, scale: i64) -> i64 {
    (pixel as i64 * scale) / PIXEL_MAX
}

#[inline]
pub fn relu(x: i64) -> i64 {
    if x > 0 {
        x
    } else {
        0
    }
}

/// `bias[i] + Σ_j (input[j] * weights[j][i]) / scale` for every column `i`.
fn dense(input: &[i64], weights: &QuantizedTensor, bias: &QuantizedTensor, scale: i64) -> Vec<i64> {
    let width = bias.values().len();
    (0..width)
        .map(|i| {
            let mut sum = bias.values()[i] as i64;
            for (j, &x) in input.iter().enumerate() {
                sum += (x * weights.at(j, i) as i64) / scale;
            }
            sum
        })
        .collect()
}

pub fn hidden_layer(model: &QuantizedModel, input: &[i64]) -> Vec<i64> {
    dense(
        input,
        model.input_hidden(),
        model.bias_hidden(),
        model.scale() as i64,
    )
    .into_iter()
    .map(relu)
    .collect()
}

pub fn output_layer(model: &QuantizedModel, hidden: &[i64]) -> Vec<i64> {
    dense(
        hidden,
        model.hidden_output(),
        model.bias_output(),
        model.scale() as i64,
    )
}

/// Index of the first maximum, 0 for an empty slice.
pub fn argmax(values: &[i64]) -> usize {
    let mut best = 0usize;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Output-layer values for `pixels`.
pub fn logits(model: &QuantizedModel, pixels: &[u8]) -> Result<Vec<i64>> {
    let expected = model.architecture().input_size;
    if pixels.len() != expected {
        return Err(ModelkitError::InputLength {
            expected,
            actual: pixels.len(),
        });
    }
    let scale = model.scale() as i64;
    let input: Vec<i64> = pixels.iter().map(|&p| normalize(p, scale)).collect();
    let hidden = hidden_layer(model, &input);
    Ok(output_layer(model, &hidden))
}

/// Predicted class for `pixels`.
pub fn classify(model: &QuantizedModel, pixels: &[u8]) -> Result<usize> {
    Ok(argmax(&logits(model, pixels)?))
}

/// Mirror of the emitted routine: the class index, or `invalid_input_code`
/// when `pixels` has the wrong length.
pub fn predict(model: &QuantizedModel, pixels: &[u8], invalid_input_code: u32) -> u32 {
    match classify(model, pixels) {
        Ok(class) => class as u32,
        Err(_) => invalid_input_code,
    }
}

/// Worst-case magnitudes reached by the forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headroom {
    pub max_product: i128,
    pub max_accumulator: i128,
    /// Upper bound of any hidden activation.
    pub max_hidden: i128,
}

/// Bound every product and running sum of the forward pass for any input in
/// `[0, 255]` and fail if one could overflow `i64`.
pub fn check_headroom(model: &QuantizedModel) -> Result<Headroom> {
    headroom_within(model, i64::MAX as i128)
}

/// With `i32` weights and a `u32` scale every hidden-layer product stays
/// below `u32::MAX * i32::MAX < i64::MAX`, so against `i64` the hidden
/// checks only trip for very wide layers.
fn headroom_within(model: &QuantizedModel, limit: i128) -> Result<Headroom> {
    let scale = model.scale() as i128;

    // normalize(255) == scale
    let (hidden_products, hidden_sums) = layer_bounds(
        scale,
        model.input_hidden(),
        model.bias_hidden(),
        scale,
    );
    check_limit("hidden", scale * PIXEL_MAX as i128, limit)?;
    check_limit("hidden", hidden_products, limit)?;
    check_limit("hidden", hidden_sums, limit)?;

    let max_hidden = hidden_sums;
    let (output_products, output_sums) = layer_bounds(
        max_hidden,
        model.hidden_output(),
        model.bias_output(),
        scale,
    );
    check_limit("output", output_products, limit)?;
    check_limit("output", output_sums, limit)?;

    let headroom = Headroom {
        max_product: hidden_products.max(output_products),
        max_accumulator: hidden_sums.max(output_sums),
        max_hidden,
    };
    debug!(
        max_product = %headroom.max_product,
        max_accumulator = %headroom.max_accumulator,
        "accumulator headroom ok"
    );
    Ok(headroom)
}

/// Largest |product| and largest |bias + Σ product / scale| over all columns,
/// given inputs bounded by `max_input`.
fn layer_bounds(
    max_input: i128,
    weights: &QuantizedTensor,
    bias: &QuantizedTensor,
    scale: i128,
) -> (i128, i128) {
    let width = bias.values().len();
    let fan_in = if width == 0 { 0 } else { weights.values().len() / width };
    let mut max_product = 0i128;
    let mut max_sum = 0i128;
    for i in 0..width {
        let mut sum = (bias.values()[i] as i128).abs();
        for j in 0..fan_in {
            let product = max_input * (weights.at(j, i) as i128).abs();
            max_product = max_product.max(product);
            sum += product / scale;
        }
        max_sum = max_sum.max(sum);
    }
    (max_product, max_sum)
}

fn check_limit(layer: &'static str, bound: i128, limit: i128) -> Result<()> {
    if bound > limit {
        return Err(ModelkitError::OverflowRisk { layer, bound });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Architecture;
    use proptest::prelude::*;

    fn model(
        arch: Architecture,
        scale: u32,
        w1: Vec<Vec<i32>>,
        b1: Vec<i32>,
        w2: Vec<Vec<i32>>,
        b2: Vec<i32>,
    ) -> QuantizedModel {
        QuantizedModel::new(
            arch,
            scale,
            QuantizedTensor::from_rows("input_hidden", &w1).unwrap(),
            QuantizedTensor::vector(b1),
            QuantizedTensor::from_rows("hidden_output", &w2).unwrap(),
            QuantizedTensor::vector(b2),
        )
        .unwrap()
    }

    /// 784 -> 10 -> 10 at scale 10000 with non-positive hidden biases, so an
    /// all-zero image leaves only `bias_output` in the logits.
    fn mnist_shaped() -> QuantizedModel {
        let w1 = (0..784)
            .map(|j| (0..10).map(|i| ((j * 7 + i * 13) % 41) as i32 - 20).collect())
            .collect();
        let b1 = vec![-5, 0, -120, -1, 0, -33, -7, 0, -2, -9];
        let w2 = (0..10)
            .map(|j| (0..10).map(|i| ((j * 11 + i * 3) % 17) as i32 * 100 - 800).collect())
            .collect();
        let b2 = vec![12, -40, 310, 7, 310, -2, 0, 99, 45, 310];
        model(Architecture::new(784, 10, 10), 10_000, w1, b1, w2, b2)
    }

    #[test]
    fn test_normalize_truncates() {
        assert_eq!(normalize(0, 10_000), 0);
        assert_eq!(normalize(1, 10_000), 39);
        assert_eq!(normalize(128, 10_000), 5019);
        assert_eq!(normalize(255, 10_000), 10_000);
    }

    #[test]
    fn test_argmax_first_maximum_wins() {
        assert_eq!(argmax(&[3, 7, 7, 1]), 1);
        assert_eq!(argmax(&[-4, -4, -4]), 0);
        assert_eq!(argmax(&[-9, -2, -3]), 1);
    }

    #[test]
    fn test_zero_image_selects_bias_output_argmax() {
        let model = mnist_shaped();
        let pixels = vec![0u8; 784];
        let logits = logits(&model, &pixels).unwrap();
        let bias: Vec<i64> = model.bias_output().values().iter().map(|&b| b as i64).collect();
        assert_eq!(logits, bias);
        // 310 appears at 2, 4 and 9; the lowest index wins.
        assert_eq!(predict(&model, &pixels, 999), 2);
    }

    #[test]
    fn test_short_input_returns_sentinel() {
        let model = mnist_shaped();
        assert_eq!(predict(&model, &[0u8; 783], 999), 999);
        assert_eq!(predict(&model, &[], 999), 999);
        assert_eq!(predict(&model, &[0u8; 785], 999), 999);
        assert!(matches!(
            classify(&model, &[0u8; 783]),
            Err(ModelkitError::InputLength {
                expected: 784,
                actual: 783
            })
        ));
    }

    #[test]
    fn test_division_truncates_each_term() {
        // Every pixel is 1 -> input 39. Each term 39 * 1 / 10000 truncates to
        // 0, while dividing the finished sum (39 * 784 / 10000) would give 3.
        let arch = Architecture::new(784, 1, 1);
        let m = model(arch, 10_000, vec![vec![1]; 784], vec![0], vec![vec![10_000]], vec![0]);
        let input: Vec<i64> = vec![1u8; 784].iter().map(|&p| normalize(p, 10_000)).collect();
        assert_eq!(hidden_layer(&m, &input), vec![0]);
        assert_eq!(logits(&m, &[1u8; 784]).unwrap(), vec![0]);
    }

    #[test]
    fn test_negative_terms_truncate_toward_zero() {
        // 100 * -15 / 100 = -15; 50 * -3 / 100 = -1 (not -2)
        let arch = Architecture::new(2, 1, 1);
        let m = model(arch, 100, vec![vec![-15], vec![-3]], vec![20], vec![vec![100]], vec![0]);
        let input = vec![100, 50];
        assert_eq!(hidden_layer(&m, &input), vec![4]);
    }

    #[test]
    fn test_hidden_relu_clamps_negative_sums() {
        let arch = Architecture::new(1, 2, 1);
        let m = model(
            arch,
            100,
            vec![vec![-200, 200]],
            vec![0, 0],
            vec![vec![100], vec![100]],
            vec![0],
        );
        assert_eq!(hidden_layer(&m, &[100]), vec![0, 200]);
    }

    #[test]
    fn test_headroom_accepts_realistic_model() {
        let headroom = check_headroom(&mnist_shaped()).unwrap();
        // |b1| <= 120 plus 784 terms of at most 10000 * 20 / 10000
        assert!(headroom.max_hidden <= 120 + 784 * 20);
        assert!(headroom.max_accumulator < i64::MAX as i128);
    }

    #[test]
    fn test_headroom_detects_output_overflow() {
        let arch = Architecture::new(2, 1, 1);
        let m = model(
            arch,
            10_000,
            vec![vec![i32::MAX], vec![i32::MAX]],
            vec![i32::MAX],
            vec![vec![i32::MAX]],
            vec![0],
        );
        match check_headroom(&m) {
            Err(ModelkitError::OverflowRisk { layer, bound }) => {
                assert_eq!(layer, "output");
                assert!(bound > i64::MAX as i128);
            }
            other => panic!("expected overflow risk, got {other:?}"),
        }
    }

    #[test]
    fn test_headroom_detects_hidden_overflow() {
        let arch = Architecture::new(2, 1, 1);
        let hidden_bound = |b1: i32, limit: i128| {
            let w1 = vec![vec![1000], vec![1000]];
            let m = model(arch, 10_000, w1, vec![b1], vec![vec![1]], vec![0]);
            match headroom_within(&m, limit) {
                Err(ModelkitError::OverflowRisk { layer, bound }) => {
                    assert_eq!(layer, "hidden");
                    bound
                }
                other => panic!("expected hidden overflow risk, got {other:?}"),
            }
        };
        // normalize(255) before the multiply: 255 * 10000
        assert_eq!(hidden_bound(0, 1_000_000), 2_550_000);
        // one product: 10000 * 1000
        assert_eq!(hidden_bound(0, 5_000_000), 10_000_000);
        // accumulator: |bias| + 2 * 10000 * 1000 / 10000
        assert_eq!(hidden_bound(i32::MAX, 20_000_000), i32::MAX as i128 + 2000);
    }

    #[test]
    fn test_hidden_layer_fits_i64_at_extreme_values() {
        let arch = Architecture::new(2, 1, 1);
        let m = model(
            arch,
            u32::MAX,
            vec![vec![i32::MIN + 1], vec![i32::MAX]],
            vec![i32::MIN + 1],
            vec![vec![0]],
            vec![0],
        );
        let headroom = check_headroom(&m).unwrap();
        assert_eq!(headroom.max_product, u32::MAX as i128 * i32::MAX as i128);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_predict_is_pure(pixels in proptest::collection::vec(any::<u8>(), 784)) {
            let model = mnist_shaped();
            let first = predict(&model, &pixels, 999);
            prop_assert!(first < 10);
            prop_assert_eq!(first, predict(&model, &pixels, 999));
        }

        #[test]
        fn prop_wrong_length_never_panics(len in 0usize..1600) {
            prop_assume!(len != 784);
            let model = mnist_shaped();
            prop_assert_eq!(predict(&model, &vec![255u8; len], 999), 999);
        }
    }
}
