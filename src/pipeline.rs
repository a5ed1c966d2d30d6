//! End-to-end export: quantize, check headroom, emit.

use tracing::{info, info_span};

use crate::config::ExportConfig;
use crate::emit::{self, EmittedUnit};
use crate::error::Result;
use crate::forward::{self, Headroom};
use crate::model::{FloatModel, QuantizedExport, QuantizedModel};
use crate::quantize;

/// Everything one export run produces. Nothing is written to disk here.
#[derive(Debug, Clone)]
pub struct ExportArtifacts {
    pub model: QuantizedModel,
    pub export: QuantizedExport,
    pub headroom: Headroom,
    pub unit: EmittedUnit,
}

/// Run every in-memory stage on `model`.
pub fn export(model: &FloatModel, config: &ExportConfig) -> Result<ExportArtifacts> {
    let _span = info_span!(
        "export",
        architecture = %config.architecture,
        scale = config.scale
    )
    .entered();
    config.validate()?;
    if let Some(accuracy) = model.accuracy {
        accuracy.validate()?;
    }

    let quantized = quantize::quantize_model(model, config)?;
    let headroom = forward::check_headroom(&quantized)?;
    let unit = emit::emit_unit(&quantized, config, model.accuracy)?;
    let export = quantized.to_export(model.accuracy);

    info!(
        parameters = config.architecture.parameter_count(),
        max_accumulator = %headroom.max_accumulator,
        "export ready"
    );
    Ok(ExportArtifacts {
        model: quantized,
        export,
        headroom,
        unit,
    })
}

/// Emit from an existing weight export instead of a float model.
pub fn emit_from_export(
    export: &QuantizedExport,
    config: &ExportConfig,
) -> Result<(QuantizedModel, EmittedUnit)> {
    let model = QuantizedModel::from_export(export)?;
    forward::check_headroom(&model)?;
    let unit = emit::emit_unit(&model, config, export.accuracy)?;
    Ok((model, unit))
}
