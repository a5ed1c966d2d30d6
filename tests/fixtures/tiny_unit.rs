// Generated by frostbite-modelkit. Do not edit.
// Architecture: 4 -> 3 -> 2, fixed-point scale 100

pub const INPUT_SIZE: usize = 4;
pub const HIDDEN_SIZE: usize = 3;
pub const OUTPUT_SIZE: usize = 2;
pub const SCALE: i64 = 100;
pub const INVALID_INPUT: u32 = 999;

pub const WEIGHTS_INPUT_HIDDEN: [[i64; HIDDEN_SIZE]; INPUT_SIZE] = [
    [50, -20, 10],
    [-30, 40, 25],
    [15, 15, -60],
    [70, -5, 30],
];

pub const BIAS_HIDDEN: [i64; HIDDEN_SIZE] = [5, -10, 0];

pub const WEIGHTS_HIDDEN_OUTPUT: [[i64; OUTPUT_SIZE]; HIDDEN_SIZE] = [
    [40, -35],
    [-25, 60],
    [30, 10],
];

pub const BIAS_OUTPUT: [i64; OUTPUT_SIZE] = [-3, 4];

/// Classify `INPUT_SIZE` raw samples in `[0, 255]`.
///
/// Returns `INVALID_INPUT` when `pixels` has the wrong length.
#[allow(clippy::needless_range_loop)]
pub fn predict(pixels: &[u8]) -> u32 {
    if pixels.len() != INPUT_SIZE {
        return INVALID_INPUT;
    }

    let mut input = [0i64; INPUT_SIZE];
    for j in 0..INPUT_SIZE {
        input[j] = (pixels[j] as i64 * SCALE) / 255;
    }

    let mut hidden = [0i64; HIDDEN_SIZE];
    for i in 0..HIDDEN_SIZE {
        let mut sum = BIAS_HIDDEN[i];
        for j in 0..INPUT_SIZE {
            sum += (input[j] * WEIGHTS_INPUT_HIDDEN[j][i]) / SCALE;
        }
        hidden[i] = if sum > 0 { sum } else { 0 };
    }

    let mut output = [0i64; OUTPUT_SIZE];
    for i in 0..OUTPUT_SIZE {
        let mut sum = BIAS_OUTPUT[i];
        for j in 0..HIDDEN_SIZE {
            sum += (hidden[j] * WEIGHTS_HIDDEN_OUTPUT[j][i]) / SCALE;
        }
        output[i] = sum;
    }

    let mut best = 0usize;
    for i in 1..OUTPUT_SIZE {
        if output[i] > output[best] {
            best = i;
        }
    }
    best as u32
}

/// `(INPUT_SIZE, HIDDEN_SIZE, OUTPUT_SIZE)`
pub fn get_model_info() -> (u32, u32, u32) {
    (INPUT_SIZE as u32, HIDDEN_SIZE as u32, OUTPUT_SIZE as u32)
}

/// Weights are compiled in, so the model is always ready.
pub fn is_ready() -> bool {
    true
}
