//! Test-sample validation of a quantized model.
//!
//! Samples never reach the generated routine; they are used offline to check
//! that the fixed-point model still classifies known images and to pick
//! demo inputs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ExportConfig, PixelEncoding};
use crate::error::{ModelkitError, Result};
use crate::forward;
use crate::io;
use crate::model::{Architecture, QuantizedModel};

/// `test_samples.json`: parallel arrays of images and labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSamples {
    pub images: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<usize>>,
}

impl TestSamples {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        io::read_json(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        io::write_json_atomic(path, self)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn validate(&self, arch: &Architecture) -> Result<()> {
        if self.is_empty() {
            return Err(ModelkitError::InvalidSamples("sample file has no images".into()));
        }
        if self.labels.len() != self.images.len() {
            return Err(ModelkitError::InvalidSamples(format!(
                "{} images but {} labels",
                self.images.len(),
                self.labels.len()
            )));
        }
        if let Some(indices) = &self.indices {
            if indices.len() != self.images.len() {
                return Err(ModelkitError::InvalidSamples(format!(
                    "{} images but {} indices",
                    self.images.len(),
                    indices.len()
                )));
            }
        }
        for (i, image) in self.images.iter().enumerate() {
            if image.len() != arch.input_size {
                return Err(ModelkitError::InvalidSamples(format!(
                    "image {} has {} values, expected {}",
                    i,
                    image.len(),
                    arch.input_size
                )));
            }
        }
        if let Some((i, label)) = self
            .labels
            .iter()
            .enumerate()
            .find(|(_, &label)| label >= arch.output_size)
        {
            return Err(ModelkitError::InvalidSamples(format!(
                "label {} of sample {} is not a class index (output_size {})",
                label, i, arch.output_size
            )));
        }
        Ok(())
    }

    /// Position in the original evaluation set, falling back to the
    /// position in this file.
    pub fn index_of(&self, position: usize) -> usize {
        self.indices
            .as_ref()
            .and_then(|indices| indices.get(position).copied())
            .unwrap_or(position)
    }
}

/// Convert one image into raw `[0, 255]` samples.
pub fn to_pixels(image: &[f64], encoding: PixelEncoding) -> Result<Vec<u8>> {
    let (factor, max) = match encoding {
        PixelEncoding::Normalized => (255.0, 1.0),
        PixelEncoding::Raw => (1.0, 255.0),
    };
    image
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if !v.is_finite() || !(0.0..=max).contains(&v) {
                return Err(ModelkitError::InvalidSamples(format!(
                    "pixel {} = {} is outside [0, {}]",
                    i, v, max
                )));
            }
            Ok((v * factor).round_ties_even() as u8)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOutcome {
    pub position: usize,
    pub index: usize,
    pub label: usize,
    pub predicted: usize,
}

impl SampleOutcome {
    pub fn is_correct(&self) -> bool {
        self.label == self.predicted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub outcomes: Vec<SampleOutcome>,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn correct(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_correct()).count()
    }

    /// Fraction of correctly classified samples, 0 when empty.
    pub fn accuracy(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.correct() as f64 / self.total() as f64
        }
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &SampleOutcome> {
        self.outcomes.iter().filter(|o| !o.is_correct())
    }
}

/// Run the reference forward pass over every sample.
pub fn validate(
    model: &QuantizedModel,
    samples: &TestSamples,
    config: &ExportConfig,
) -> Result<ValidationReport> {
    samples.validate(&model.architecture())?;
    let mut outcomes = Vec::with_capacity(samples.len());
    for (position, (image, &label)) in samples.images.iter().zip(&samples.labels).enumerate() {
        let pixels = to_pixels(image, config.samples.encoding)?;
        let predicted = forward::classify(model, &pixels)?;
        outcomes.push(SampleOutcome {
            position,
            index: samples.index_of(position),
            label,
            predicted,
        });
    }
    let report = ValidationReport { outcomes };
    info!(
        total = report.total(),
        correct = report.correct(),
        accuracy = report.accuracy(),
        "validated test samples"
    );
    Ok(report)
}

/// Keep the first `config.samples.per_class` correctly classified samples of
/// every class, ordered by class.
pub fn select_per_class(
    model: &QuantizedModel,
    samples: &TestSamples,
    config: &ExportConfig,
) -> Result<TestSamples> {
    let report = validate(model, samples, config)?;
    let per_class = config.samples.per_class;

    let mut by_class: BTreeMap<usize, Vec<&SampleOutcome>> = BTreeMap::new();
    for outcome in report.outcomes.iter().filter(|o| o.is_correct()) {
        let bucket = by_class.entry(outcome.label).or_default();
        if bucket.len() < per_class {
            bucket.push(outcome);
        }
    }

    let output_size = model.architecture().output_size;
    let missing: Vec<usize> = (0..output_size)
        .filter(|class| by_class.get(class).map_or(0, Vec::len) < per_class)
        .collect();
    if !missing.is_empty() {
        warn!(?missing, per_class, "not enough correctly classified samples for some classes");
    }

    let selected: Vec<&SampleOutcome> = by_class.into_values().flatten().collect();
    Ok(TestSamples {
        images: selected
            .iter()
            .map(|o| samples.images[o.position].clone())
            .collect(),
        labels: selected.iter().map(|o| o.label).collect(),
        indices: Some(selected.iter().map(|o| o.index).collect()),
    })
}
