//! Frostbite modelkit CLI
//!
//! ```bash
//! # Quantize a float model into model_weights.json
//! modelkit quantize --model model_float.json --out model_weights.json
//!
//! # Full export: weights, emitted unit and guest template in one go
//! modelkit export --model model_float.json \
//!     --weights-out model_weights.json \
//!     --unit-out mnist_unit.rs \
//!     --template templates/guest_mnist/src/main.rs
//!
//! # Check the quantized model against labelled samples
//! modelkit verify --weights model_weights.json --samples test_samples.json
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use frostbite_modelkit::config::ExportConfig;
use frostbite_modelkit::inject::{self, InjectOutcome, Placeholder};
use frostbite_modelkit::model::{FloatModel, QuantizedExport, QuantizedModel};
use frostbite_modelkit::samples::{self, TestSamples};
use frostbite_modelkit::{io, pipeline, quantize, EmittedUnit, ModelkitError};

#[derive(Parser)]
#[command(name = "modelkit")]
#[command(version)]
#[command(about = "Quantize a two-layer perceptron and emit its fixed-point forward pass")]
struct Cli {
    /// Export config (TOML); defaults to the 784 -> 10 -> 10 model at scale 10000
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quantize a float model into the weight export format
    Quantize {
        /// Float model JSON
        #[arg(short, long)]
        model: PathBuf,

        /// Weight export output
        #[arg(short, long, default_value = "model_weights.json")]
        out: PathBuf,
    },

    /// Emit the inference unit from a weight export
    Emit {
        /// Weight export JSON
        #[arg(short, long)]
        weights: PathBuf,

        /// Emitted Rust source
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Inject a previously emitted unit into a template
    Inject {
        /// Template file containing the placeholder region
        #[arg(short, long)]
        template: PathBuf,

        /// Emitted unit to splice in
        #[arg(short, long)]
        unit: PathBuf,
    },

    /// Quantize, emit and optionally inject in one run
    Export {
        /// Float model JSON
        #[arg(short, long)]
        model: PathBuf,

        /// Weight export output
        #[arg(long, default_value = "model_weights.json")]
        weights_out: PathBuf,

        /// Emitted unit output
        #[arg(long)]
        unit_out: Option<PathBuf>,

        /// Template to patch
        #[arg(short, long)]
        template: Option<PathBuf>,
    },

    /// Classify labelled samples with the reference forward pass
    Verify {
        /// Weight export JSON
        #[arg(short, long)]
        weights: PathBuf,

        /// Test sample JSON
        #[arg(short, long)]
        samples: PathBuf,
    },

    /// Pick correctly classified demo samples per class
    SelectSamples {
        /// Weight export JSON
        #[arg(short, long)]
        weights: PathBuf,

        /// Test sample JSON to pick from
        #[arg(short, long)]
        samples: PathBuf,

        /// Output sample JSON
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ModelkitError>() {
                Some(e) => error!("{} stage failed: {:#}", e.stage(), err),
                None => error!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = ExportConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Quantize { model, out } => {
            let float = FloatModel::load(&model)?;
            let quantized = quantize::quantize_model(&float, &config)?;
            quantized.to_export(float.accuracy).save(&out)?;
            info!(path = %out.display(), "weights saved");
        }
        Commands::Emit { weights, out } => {
            let export = QuantizedExport::load(&weights)?;
            let (_, unit) = pipeline::emit_from_export(&export, &config)?;
            unit.save(&out)?;
            info!(path = %out.display(), "unit saved");
        }
        Commands::Inject { template, unit } => {
            let unit = EmittedUnit::load(&unit)?;
            let placeholder = Placeholder::from(&config.placeholder);
            let outcome =
                inject::inject_file(&template, &unit, &placeholder, config.placeholder.embed)?;
            report_outcome(&template, outcome);
        }
        Commands::Export {
            model,
            weights_out,
            unit_out,
            template,
        } => {
            run_export(&config, &model, &weights_out, unit_out.as_deref(), template.as_deref())?;
        }
        Commands::Verify {
            weights,
            samples: samples_path,
        } => {
            let model = load_quantized(&weights)?;
            let test = TestSamples::load(&samples_path)?;
            let report = samples::validate(&model, &test, &config)?;
            for miss in report.mismatches() {
                println!(
                    "  sample #{} (index {}): label={}, prediction={}",
                    miss.position, miss.index, miss.label, miss.predicted
                );
            }
            println!(
                "{}/{} correct ({:.2}%)",
                report.correct(),
                report.total(),
                report.accuracy() * 100.0
            );
        }
        Commands::SelectSamples {
            weights,
            samples: samples_path,
            out,
        } => {
            let model = load_quantized(&weights)?;
            let test = TestSamples::load(&samples_path)?;
            let picked = samples::select_per_class(&model, &test, &config)?;
            picked.save(&out)?;
            info!(path = %out.display(), selected = picked.len(), "samples saved");
        }
    }
    Ok(())
}

/// Every stage runs in memory first; files are only touched once all of
/// them succeeded.
fn run_export(
    config: &ExportConfig,
    model: &Path,
    weights_out: &Path,
    unit_out: Option<&Path>,
    template: Option<&Path>,
) -> Result<()> {
    let float = FloatModel::load(model)?;
    let artifacts = pipeline::export(&float, config)?;

    let patched = match template {
        Some(path) => {
            let original = io::read_to_string(path)?;
            let placeholder = Placeholder::from(&config.placeholder);
            let patched = inject::inject_str(
                &original,
                &artifacts.unit,
                &placeholder,
                config.placeholder.embed,
            )?;
            Some((path, original, patched))
        }
        None => None,
    };

    artifacts.export.save(weights_out)?;
    info!(path = %weights_out.display(), "weights saved");
    if let Some(path) = unit_out {
        artifacts.unit.save(path)?;
        info!(path = %path.display(), "unit saved");
    }
    if let Some((path, original, patched)) = patched {
        let outcome = if patched == original {
            InjectOutcome::Unchanged
        } else {
            io::write_atomic(path, patched.as_bytes())?;
            InjectOutcome::Updated
        };
        report_outcome(path, outcome);
    }

    println!(
        "Exported {} ({} parameters, scale {})",
        config.architecture,
        config.architecture.parameter_count(),
        config.scale
    );
    if let Some(accuracy) = float.accuracy {
        println!("Model accuracy: {:.2}%", accuracy.test * 100.0);
    }
    Ok(())
}

fn load_quantized(path: &Path) -> Result<QuantizedModel> {
    Ok(QuantizedModel::from_export(&QuantizedExport::load(path)?)?)
}

fn report_outcome(path: &Path, outcome: InjectOutcome) {
    match outcome {
        InjectOutcome::Updated => println!("Updated {}", path.display()),
        InjectOutcome::Unchanged => println!("{} already up to date", path.display()),
    }
}
