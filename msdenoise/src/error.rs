//! Error types of the denoising core.
//!
//! Per-record errors ([`RecordError`]) fail a single spectrum and are reported;
//! configuration errors ([`ConfigError`]) reject a whole batch before any work starts.

use serde::{Deserialize, Serialize};

/// Malformed elemental formula text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaParseError {
    #[error("empty formula")]
    Empty,

    #[error("unknown element '{0}'")]
    UnknownElement(String),

    #[error("invalid atom count '{count}' at position {position}")]
    InvalidCount { count: String, position: usize },

    #[error("unbalanced parenthesis at position {0}")]
    UnbalancedParenthesis(usize),

    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },
}

/// Subtraction would leave a negative atom count.
///
/// This is the normal way a candidate is rejected, not a processing failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot remove {required} {element} from a formula holding {available}")]
pub struct UnreachableFormula {
    pub element: String,
    pub available: u32,
    pub required: u32,
}

/// An atom count no longer fits into `u32`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("atom count of {element} overflows")]
pub struct CountOverflow {
    pub element: String,
}

/// Formula arithmetic that could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaArithmeticError {
    #[error(transparent)]
    Unreachable(#[from] UnreachableFormula),

    #[error(transparent)]
    Overflow(#[from] CountOverflow),
}

/// Malformed SMILES text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmilesParseError {
    #[error("empty structure")]
    Empty,

    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },

    #[error("unknown atom '{symbol}' at position {position}")]
    UnknownAtom { symbol: String, position: usize },

    #[error("unclosed bracket atom starting at position {0}")]
    UnclosedBracket(usize),

    #[error("unclosed branch opened at position {0}")]
    UnclosedBranch(usize),

    #[error("branch closed at position {0} without being opened")]
    UnmatchedBranchClose(usize),

    #[error("ring bond {0} is never closed")]
    UnclosedRing(u32),

    #[error("bond symbol at position {0} is not followed by an atom")]
    DanglingBond(usize),

    #[error("ring bond {label} at position {position} closes on its own atom or duplicates a bond")]
    InvalidRingBond { label: u32, position: usize },

    #[error("atom {index} ({symbol}) exceeds every allowed valence")]
    ValenceExceeded { symbol: String, index: usize },
}

/// Malformed precursor adduct notation such as `[M+H]+`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdductParseError {
    #[error("'{0}' is not an adduct of the form [nM+X-Y]z+")]
    Malformed(String),

    #[error("adduct term '{term}': {source}")]
    Term {
        term: String,
        source: FormulaParseError,
    },

    #[error("adduct '{notation}': {source}")]
    Overflow {
        notation: String,
        source: CountOverflow,
    },
}

/// Unrecoverable problem with one spectral record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("malformed precursor formula: {0}")]
    Formula(#[from] FormulaParseError),

    #[error("malformed precursor structure: {0}")]
    Structure(#[from] SmilesParseError),

    #[error("structure formula {structure} does not match precursor formula {formula}")]
    StructureMismatch { structure: String, formula: String },

    #[error("malformed adduct: {0}")]
    Adduct(#[from] AdductParseError),

    #[error("adduct {adduct} cannot be applied to {formula}: {source}")]
    AdductNotApplicable {
        adduct: String,
        formula: String,
        source: FormulaArithmeticError,
    },

    #[error("empty peak list")]
    EmptyPeakList,

    #[error("invalid peak {index}: m/z {mz}, intensity {intensity}")]
    InvalidPeak { index: usize, mz: f64, intensity: f64 },

    #[error("precursor charge must be non-zero and at most {max} in magnitude, got {charge}")]
    InvalidCharge { charge: i32, max: u32 },
}

/// Serializable classification of a [`RecordError`] for the report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordErrorKind {
    MalformedFormula,
    MalformedStructure,
    StructureMismatch,
    MalformedAdduct,
    AdductNotApplicable,
    EmptyPeakList,
    InvalidPeak,
    InvalidCharge,
}

impl RecordError {
    pub fn kind(&self) -> RecordErrorKind {
        match self {
            RecordError::Formula(_) => RecordErrorKind::MalformedFormula,
            RecordError::Structure(_) => RecordErrorKind::MalformedStructure,
            RecordError::StructureMismatch { .. } => RecordErrorKind::StructureMismatch,
            RecordError::Adduct(_) => RecordErrorKind::MalformedAdduct,
            RecordError::AdductNotApplicable { .. } => RecordErrorKind::AdductNotApplicable,
            RecordError::EmptyPeakList => RecordErrorKind::EmptyPeakList,
            RecordError::InvalidPeak { .. } => RecordErrorKind::InvalidPeak,
            RecordError::InvalidCharge { .. } => RecordErrorKind::InvalidCharge,
        }
    }
}

/// Invalid batch configuration. Raised before any record is processed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("tolerance_da must be a positive finite number, got {0}")]
    NonPositiveTolerance(f64),

    #[error("worker_count must be at least 1")]
    ZeroWorkers,

    #[error("satellite_window_da must be a non-negative finite number, got {0}")]
    InvalidSatelliteWindow(f64),

    #[error("candidate_depth must be at most {max}, got {depth}")]
    CandidateDepthTooLarge { depth: usize, max: usize },

    #[error("hydrogen_shift must be at most {max}, got {shift}")]
    HydrogenShiftTooLarge { shift: u32, max: u32 },

    #[error("unsupported policy '{0}', expected 'permissive' or 'strict'")]
    UnsupportedPolicy(String),

    #[error("unsupported instrument preset '{0}', expected 'orbitrap' or 'tof'")]
    UnsupportedInstrument(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_kind() {
        let err = RecordError::from(FormulaParseError::UnknownElement("Xx".to_string()));
        assert_eq!(err.kind(), RecordErrorKind::MalformedFormula);
        assert_eq!(err.to_string(), "malformed precursor formula: unknown element 'Xx'");
        assert_eq!(RecordError::EmptyPeakList.kind(), RecordErrorKind::EmptyPeakList);
    }

    #[test]
    fn test_config_error_names_field() {
        let err = ConfigError::NonPositiveTolerance(-0.1);
        assert!(err.to_string().contains("tolerance_da"));
        assert!(ConfigError::ZeroWorkers.to_string().contains("worker_count"));
    }
}
