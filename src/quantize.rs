//! Float to fixed-point quantization.
//!
//! Every tensor of one export shares a single integer scale. Each element
//! becomes `round(x * scale)` using round-half-to-even, the same policy as
//! `np.round`, so values sitting exactly on a `.5` boundary quantize the same
//! way the training side reports them.

use std::fmt;

use tracing::debug;

use crate::config::ExportConfig;
use crate::error::{ModelkitError, Result};
use crate::model::{FloatModel, QuantizedModel};

/// Shape of a quantized tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Vector(usize),
    Matrix { rows: usize, cols: usize },
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Vector(len) => write!(f, "{}", len),
            Shape::Matrix { rows, cols } => write!(f, "{}x{}", rows, cols),
        }
    }
}

/// Integer tensor with row-major storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedTensor {
    shape: Shape,
    values: Vec<i32>,
}

impl QuantizedTensor {
    pub fn vector(values: Vec<i32>) -> Self {
        Self {
            shape: Shape::Vector(values.len()),
            values,
        }
    }

    /// Build a matrix from nested rows. Ragged rows are rejected.
    pub fn from_rows(name: &str, rows: &[Vec<i32>]) -> Result<Self> {
        let cols = check_rectangular(name, rows)?;
        Ok(Self {
            shape: Shape::Matrix {
                rows: rows.len(),
                cols,
            },
            values: rows.iter().flatten().copied().collect(),
        })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Element `(row, col)` of a matrix. Vectors are treated as a single row.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> i32 {
        match self.shape {
            Shape::Vector(_) => self.values[col],
            Shape::Matrix { cols, .. } => self.values[row * cols + col],
        }
    }

    /// Rows of a matrix (a vector yields one row).
    pub fn rows(&self) -> impl Iterator<Item = &[i32]> {
        let width = match self.shape {
            Shape::Vector(len) => len.max(1),
            Shape::Matrix { cols, .. } => cols.max(1),
        };
        self.values.chunks(width)
    }

    pub fn to_rows(&self) -> Vec<Vec<i32>> {
        self.rows().map(<[i32]>::to_vec).collect()
    }

    /// Largest absolute element, 0 for an empty tensor.
    pub fn max_abs(&self) -> i64 {
        self.values
            .iter()
            .map(|&v| (v as i64).abs())
            .max()
            .unwrap_or(0)
    }
}

/// Why a single value could not be quantized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueFault {
    NonFinite(f64),
    OutOfRange(f64),
}

impl fmt::Display for ValueFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueFault::NonFinite(x) => write!(f, "non-finite value {}", x),
            ValueFault::OutOfRange(x) => write!(f, "value {} overflows i32 after scaling", x),
        }
    }
}

/// `round_half_even(x * scale)` as `i32`.
pub fn quantize_value(x: f64, scale: u32) -> std::result::Result<i32, ValueFault> {
    if !x.is_finite() {
        return Err(ValueFault::NonFinite(x));
    }
    let scaled = (x * scale as f64).round_ties_even();
    if scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(ValueFault::OutOfRange(x));
    }
    Ok(scaled as i32)
}

pub fn quantize_vector(name: &str, values: &[f64], scale: u32) -> Result<QuantizedTensor> {
    check_scale(scale)?;
    if values.is_empty() {
        return Err(invalid(name, "tensor is empty".into()));
    }
    let quantized = quantize_slice(name, values, 0, scale)?;
    Ok(QuantizedTensor::vector(quantized))
}

pub fn quantize_matrix(name: &str, rows: &[Vec<f64>], scale: u32) -> Result<QuantizedTensor> {
    check_scale(scale)?;
    let cols = check_rectangular(name, rows)?;
    if rows.is_empty() || cols == 0 {
        return Err(invalid(name, "tensor is empty".into()));
    }
    let mut values = Vec::with_capacity(rows.len() * cols);
    for (r, row) in rows.iter().enumerate() {
        values.extend(quantize_slice(name, row, r * cols, scale)?);
    }
    Ok(QuantizedTensor {
        shape: Shape::Matrix {
            rows: rows.len(),
            cols,
        },
        values,
    })
}

/// Quantize all four tensors of `model` with `config.scale`.
pub fn quantize_model(model: &FloatModel, config: &ExportConfig) -> Result<QuantizedModel> {
    let arch = config.architecture;
    if model.architecture != arch {
        return Err(ModelkitError::ArchitectureMismatch {
            expected: arch,
            actual: model.architecture,
        });
    }

    let (w1, b1) = model.layer(0)?;
    let (w2, b2) = model.layer(1)?;

    let input_hidden = quantize_matrix("input_hidden", w1, config.scale)?;
    expect_float_shape("input_hidden", arch.input_hidden_shape(), input_hidden.shape())?;
    let bias_hidden = quantize_vector("bias_hidden", b1, config.scale)?;
    expect_float_shape("bias_hidden", arch.bias_hidden_shape(), bias_hidden.shape())?;
    let hidden_output = quantize_matrix("hidden_output", w2, config.scale)?;
    expect_float_shape("hidden_output", arch.hidden_output_shape(), hidden_output.shape())?;
    let bias_output = quantize_vector("bias_output", b2, config.scale)?;
    expect_float_shape("bias_output", arch.bias_output_shape(), bias_output.shape())?;

    debug!(
        scale = config.scale,
        parameters = arch.parameter_count(),
        max_weight = input_hidden.max_abs().max(hidden_output.max_abs()),
        "quantized model"
    );

    QuantizedModel::new(
        arch,
        config.scale,
        input_hidden,
        bias_hidden,
        hidden_output,
        bias_output,
    )
}

fn quantize_slice(name: &str, values: &[f64], offset: usize, scale: u32) -> Result<Vec<i32>> {
    values
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            quantize_value(x, scale)
                .map_err(|fault| invalid(name, format!("element {}: {}", offset + i, fault)))
        })
        .collect()
}

fn check_scale(scale: u32) -> Result<()> {
    if scale == 0 {
        return Err(ModelkitError::InvalidConfig("scale must be positive".into()));
    }
    Ok(())
}

fn check_rectangular<T>(name: &str, rows: &[Vec<T>]) -> Result<usize> {
    let cols = rows.first().map_or(0, Vec::len);
    if let Some((r, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != cols) {
        return Err(invalid(
            name,
            format!("ragged matrix: row {} has {} columns, expected {}", r, row.len(), cols),
        ));
    }
    Ok(cols)
}

fn expect_float_shape(name: &str, expected: Shape, actual: Shape) -> Result<()> {
    if expected != actual {
        return Err(invalid(name, format!("expected shape {}, got {}", expected, actual)));
    }
    Ok(())
}

fn invalid(name: &str, reason: String) -> ModelkitError {
    ModelkitError::InvalidTensor {
        tensor: name.to_string(),
        reason,
    }
}
