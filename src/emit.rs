//! Rust source emission for the fixed-point forward pass.
//!
//! The unit holds the architecture constants, the four weight tensors as `i64`
//! const arrays and three routines: `predict`, `get_model_info` and
//! `is_ready`. It needs neither `alloc` nor floats and carries no inner
//! attributes, so it can be spliced into a `#![no_std]` guest or pulled in
//! with `include!`.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{info, warn};

use crate::config::ExportConfig;
use crate::error::{ModelkitError, Result};
use crate::io;
use crate::model::{Accuracy, QuantizedModel};
use crate::quantize::{QuantizedTensor, Shape};

/// Generated source for one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedUnit {
    text: String,
}

impl EmittedUnit {
    /// Wrap previously emitted text (e.g. read back from disk).
    pub fn from_text(text: impl Into<String>) -> Self {
        let mut text = text.into();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Self { text }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_text(io::read_to_string(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        io::write_atomic(path, self.text.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

// Keep in lockstep with `forward::logits`.
const ROUTINES: &str = r#"/// Classify `INPUT_SIZE` raw samples in `[0, 255]`.
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
"#;

/// Render `model` as a self-contained Rust unit.
///
/// Shapes are checked against `config.architecture` before anything is
/// rendered; on error no text is produced.
pub fn emit_unit(
    model: &QuantizedModel,
    config: &ExportConfig,
    accuracy: Option<Accuracy>,
) -> Result<EmittedUnit> {
    config.validate()?;
    let arch = config.architecture;
    check_shape("input_hidden", arch.input_hidden_shape(), model.input_hidden())?;
    check_shape("bias_hidden", arch.bias_hidden_shape(), model.bias_hidden())?;
    check_shape("hidden_output", arch.hidden_output_shape(), model.hidden_output())?;
    check_shape("bias_output", arch.bias_output_shape(), model.bias_output())?;
    if let Some(accuracy) = accuracy {
        accuracy.validate()?;
    }
    if model.scale() != config.scale {
        warn!(
            model_scale = model.scale(),
            config_scale = config.scale,
            "emitting with the model's scale"
        );
    }

    let mut out = String::with_capacity(estimate_len(model));
    writeln!(out, "// Generated by frostbite-modelkit. Do not edit.")?;
    writeln!(
        out,
        "// Architecture: {}, fixed-point scale {}",
        arch,
        model.scale()
    )?;
    if let Some(accuracy) = accuracy {
        writeln!(
            out,
            "// Accuracy: train {:.2}%, test {:.2}%",
            accuracy.train * 100.0,
            accuracy.test * 100.0
        )?;
    }
    writeln!(out)?;
    writeln!(out, "pub const INPUT_SIZE: usize = {};", arch.input_size)?;
    writeln!(out, "pub const HIDDEN_SIZE: usize = {};", arch.hidden_size)?;
    writeln!(out, "pub const OUTPUT_SIZE: usize = {};", arch.output_size)?;
    writeln!(out, "pub const SCALE: i64 = {};", model.scale())?;
    writeln!(out, "pub const INVALID_INPUT: u32 = {};", config.invalid_input_code)?;
    writeln!(out)?;
    write_matrix(
        &mut out,
        "WEIGHTS_INPUT_HIDDEN",
        "HIDDEN_SIZE",
        "INPUT_SIZE",
        model.input_hidden(),
    )?;
    writeln!(out)?;
    write_vector(&mut out, "BIAS_HIDDEN", "HIDDEN_SIZE", model.bias_hidden())?;
    writeln!(out)?;
    write_matrix(
        &mut out,
        "WEIGHTS_HIDDEN_OUTPUT",
        "OUTPUT_SIZE",
        "HIDDEN_SIZE",
        model.hidden_output(),
    )?;
    writeln!(out)?;
    write_vector(&mut out, "BIAS_OUTPUT", "OUTPUT_SIZE", model.bias_output())?;
    writeln!(out)?;
    out.push_str(ROUTINES);

    info!(
        architecture = %arch,
        scale = model.scale(),
        bytes = out.len(),
        "emitted inference unit"
    );
    Ok(EmittedUnit { text: out })
}

fn check_shape(tensor: &str, expected: Shape, actual: &QuantizedTensor) -> Result<()> {
    if actual.shape() != expected {
        return Err(ModelkitError::ShapeMismatch {
            tensor: tensor.to_string(),
            expected,
            actual: actual.shape(),
        });
    }
    Ok(())
}

fn write_matrix(
    out: &mut String,
    name: &str,
    cols: &str,
    rows: &str,
    tensor: &QuantizedTensor,
) -> Result<()> {
    writeln!(out, "pub const {}: [[i64; {}]; {}] = [", name, cols, rows)?;
    for row in tensor.rows() {
        out.push_str("    [");
        write_values(out, row)?;
        out.push_str("],\n");
    }
    writeln!(out, "];")?;
    Ok(())
}

fn write_vector(out: &mut String, name: &str, len: &str, tensor: &QuantizedTensor) -> Result<()> {
    write!(out, "pub const {}: [i64; {}] = [", name, len)?;
    write_values(out, tensor.values())?;
    writeln!(out, "];")?;
    Ok(())
}

fn write_values(out: &mut String, values: &[i32]) -> Result<()> {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{}", v)?;
    }
    Ok(())
}

fn estimate_len(model: &QuantizedModel) -> usize {
    // ~8 bytes per literal plus the fixed routine text
    model.architecture().parameter_count() * 8 + ROUTINES.len() + 1024
}
