mod cli;
mod errors;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use msdenoise::data::spectrum::SpectralRecord;
use msdenoise::denoise::batch::{process_with_progress, CancellationToken};
use msdenoise::denoise::config::{DenoiseConfig, InstrumentPreset, Policy};

use cli::Cli;
use errors::CliError;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let file = File::open(path).map_err(|e| CliError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| CliError::parse(path, e))
}

fn write_json<T: Serialize>(data: &T, path: &Path) -> Result<(), CliError> {
    let file = File::create(path).map_err(|e| CliError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data).map_err(CliError::Serialize)?;
    writer.flush().map_err(|e| CliError::io(path, e))
}

// file config first, then flags
fn build_config(args: &Cli) -> Result<DenoiseConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => read_json::<DenoiseConfig>(path)?,
        None => DenoiseConfig::default(),
    };
    if let Some(instrument) = &args.instrument {
        config.tolerance_da = instrument.parse::<InstrumentPreset>()?.tolerance_da();
    }
    if let Some(tolerance) = args.tolerance {
        config.tolerance_da = tolerance;
    }
    if let Some(depth) = args.depth {
        config.candidate_depth = depth;
    }
    if let Some(policy) = &args.satellite_policy {
        config.satellite_policy = policy.parse::<Policy>()?;
    }
    if let Some(policy) = &args.exhaustion_policy {
        config.exhaustion_policy = policy.parse::<Policy>()?;
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Cli::parse();
    let config = build_config(&args)?;
    info!("Parsed configuration: {:?}", config);

    let records: Vec<SpectralRecord> = read_json(&args.input)?;
    info!("Read {} records from {}", records.len(), args.input.display());

    let step = (records.len() / 10).max(1);
    let output = process_with_progress(&records, &config, &CancellationToken::new(), |progress| {
        if progress.completed % step == 0 || progress.completed == progress.total {
            info!("Processed {}/{} records", progress.completed, progress.total);
        }
    })?;

    for failure in output.report.failures() {
        if let Some(error) = &failure.error {
            warn!(
                "record {} ({}) failed: {}",
                failure.index,
                failure.id.as_deref().unwrap_or("-"),
                error.message
            );
        }
    }

    write_json(&output.cleaned, &args.output)?;
    info!("Wrote {} cleaned records to {}", output.cleaned.len(), args.output.display());

    if let Some(path) = &args.report {
        if args.summary_only {
            write_json(&output.report.without_decisions(), path)?;
        } else {
            write_json(&output.report, path)?;
        }
        info!("Wrote report to {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Cli::parse_from([
            "msdenoise",
            "--input",
            "in.json",
            "--output",
            "out.json",
            "--instrument",
            "tof",
            "--exhaustion-policy",
            "strict",
            "--workers",
            "2",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.tolerance_da, 0.01);
        assert_eq!(config.exhaustion_policy, Policy::Strict);
        assert_eq!(config.worker_count, 2);

        let args = Cli::parse_from([
            "msdenoise", "-i", "in.json", "-o", "out.json", "--instrument", "tof", "--tolerance", "0.002",
        ]);
        assert_eq!(build_config(&args).unwrap().tolerance_da, 0.002);
    }

    #[test]
    fn test_bad_flags_are_config_errors() {
        let args = Cli::parse_from(["msdenoise", "-i", "in.json", "-o", "out.json", "--satellite-policy", "maybe"]);
        assert!(matches!(build_config(&args), Err(CliError::Config(_))));

        let args = Cli::parse_from(["msdenoise", "-i", "in.json", "-o", "out.json", "--workers", "0"]);
        assert!(matches!(build_config(&args), Err(CliError::Config(_))));
    }
}
