use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Remove chemically implausible peaks from MS/MS spectra", long_about = None)]
pub struct Cli {
    /// JSON array of spectral records
    #[arg(short, long)]
    pub input: PathBuf,

    /// Where to write the cleaned records as JSON
    #[arg(short, long)]
    pub output: PathBuf,

    /// Where to write the denoising report as JSON
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Path to a JSON configuration file (flags below over-write it)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Instrument preset setting the tolerance: orbitrap (0.005 Da) or tof (0.01 Da)
    #[arg(long)]
    pub instrument: Option<String>,

    /// Absolute mass tolerance in Da, takes precedence over the instrument preset
    #[arg(short, long)]
    pub tolerance: Option<f64>,

    /// Maximum number of bond cleavages or neutral losses per fragment
    #[arg(short, long)]
    pub depth: Option<usize>,

    /// permissive or strict handling of isotope satellites
    #[arg(long)]
    pub satellite_policy: Option<String>,

    /// permissive or strict handling of records without fragment candidates
    #[arg(long)]
    pub exhaustion_policy: Option<String>,

    /// Number of worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Leave the per-peak decisions out of the report
    #[arg(long)]
    pub summary_only: bool,
}
