//! Batch configuration.
//!
//! Validated once before a batch starts; an invalid field rejects the whole batch.

use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::algorithm::fragmentation::{GeneratorSettings, MAX_CANDIDATE_DEPTH, MAX_HYDROGEN_SHIFT};
use crate::algorithm::matching::PeakMatcher;
use crate::error::ConfigError;

pub const DEFAULT_TOLERANCE_DA: f64 = 0.005;
pub const DEFAULT_CANDIDATE_DEPTH: usize = 2;
pub const DEFAULT_SATELLITE_WINDOW_DA: f64 = 3.0;
pub const DEFAULT_HYDROGEN_SHIFT: u32 = 1;

/// Keep or drop when the evidence is inconclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    #[default]
    Permissive,
    Strict,
}

impl Policy {
    pub fn keeps(&self) -> bool {
        matches!(self, Policy::Permissive)
    }
}

impl FromStr for Policy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(Policy::Permissive),
            "strict" => Ok(Policy::Strict),
            _ => Err(ConfigError::UnsupportedPolicy(s.to_string())),
        }
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Permissive => write!(f, "permissive"),
            Policy::Strict => write!(f, "strict"),
        }
    }
}

/// Instrument classes with their customary absolute mass tolerance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentPreset {
    /// Orbitrap / Q Exactive
    Orbitrap,
    /// time of flight
    Tof,
}

impl InstrumentPreset {
    pub fn tolerance_da(&self) -> f64 {
        match self {
            InstrumentPreset::Orbitrap => 0.005,
            InstrumentPreset::Tof => 0.01,
        }
    }
}

impl FromStr for InstrumentPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orbitrap" | "qe" => Ok(InstrumentPreset::Orbitrap),
            "tof" | "qtof" => Ok(InstrumentPreset::Tof),
            _ => Err(ConfigError::UnsupportedInstrument(s.to_string())),
        }
    }
}

/// Denoising configuration shared by every record of a batch.
///
/// All fields have defaults, so a partial JSON object deserializes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// absolute mass tolerance in Da, inclusive
    pub tolerance_da: f64,
    /// maximum number of bond cleavages or neutral losses per candidate
    pub candidate_depth: usize,
    /// whether isotope satellites above the precursor are kept
    pub satellite_policy: Policy,
    /// whether peaks of a record without any fragment candidate are kept
    pub exhaustion_policy: Policy,
    pub worker_count: usize,
    /// range above the precursor mass in which satellites are recognised
    pub satellite_window_da: f64,
    /// hydrogen rearrangements tried around cleavage products
    pub hydrogen_shift: u32,
    /// reject neutral losses with negative ring-plus-double-bond equivalents
    pub strict_valence: bool,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        DenoiseConfig {
            tolerance_da: DEFAULT_TOLERANCE_DA,
            candidate_depth: DEFAULT_CANDIDATE_DEPTH,
            satellite_policy: Policy::Permissive,
            exhaustion_policy: Policy::Permissive,
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            satellite_window_da: DEFAULT_SATELLITE_WINDOW_DA,
            hydrogen_shift: DEFAULT_HYDROGEN_SHIFT,
            strict_valence: false,
        }
    }
}

impl DenoiseConfig {
    /// Keep satellites and the peaks of records nothing can be said about.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Keep only peaks explained by a fragment candidate.
    pub fn strict() -> Self {
        Self {
            satellite_policy: Policy::Strict,
            exhaustion_policy: Policy::Strict,
            strict_valence: true,
            ..Self::default()
        }
    }

    pub fn for_instrument(preset: InstrumentPreset) -> Self {
        Self {
            tolerance_da: preset.tolerance_da(),
            ..Self::default()
        }
    }

    pub fn with_tolerance(mut self, tolerance_da: f64) -> Self {
        self.tolerance_da = tolerance_da;
        self
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_depth(mut self, candidate_depth: usize) -> Self {
        self.candidate_depth = candidate_depth;
        self
    }

    /// Check every field, naming the first invalid one.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::denoise::config::DenoiseConfig;
    ///
    /// assert!(DenoiseConfig::default().validate().is_ok());
    /// assert!(DenoiseConfig::default().with_tolerance(0.0).validate().is_err());
    /// assert!(DenoiseConfig::default().with_workers(0).validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance_da.is_finite() || self.tolerance_da <= 0.0 {
            return Err(ConfigError::NonPositiveTolerance(self.tolerance_da));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if !self.satellite_window_da.is_finite() || self.satellite_window_da < 0.0 {
            return Err(ConfigError::InvalidSatelliteWindow(self.satellite_window_da));
        }
        if self.candidate_depth > MAX_CANDIDATE_DEPTH {
            return Err(ConfigError::CandidateDepthTooLarge {
                depth: self.candidate_depth,
                max: MAX_CANDIDATE_DEPTH,
            });
        }
        if self.hydrogen_shift > MAX_HYDROGEN_SHIFT {
            return Err(ConfigError::HydrogenShiftTooLarge {
                shift: self.hydrogen_shift,
                max: MAX_HYDROGEN_SHIFT,
            });
        }
        Ok(())
    }

    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            depth: self.candidate_depth,
            hydrogen_shift: self.hydrogen_shift,
            strict_valence: self.strict_valence,
        }
    }

    pub fn matcher(&self) -> PeakMatcher {
        PeakMatcher::new(self.tolerance_da, self.satellite_window_da)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!("permissive".parse::<Policy>(), Ok(Policy::Permissive));
        assert_eq!(" Strict ".parse::<Policy>(), Ok(Policy::Strict));
        assert_eq!(
            "lenient".parse::<Policy>(),
            Err(ConfigError::UnsupportedPolicy("lenient".to_string()))
        );
    }

    #[test]
    fn test_instrument_presets() {
        assert_eq!("orbitrap".parse::<InstrumentPreset>().unwrap().tolerance_da(), 0.005);
        assert_eq!("TOF".parse::<InstrumentPreset>().unwrap().tolerance_da(), 0.01);
        assert!("fticr".parse::<InstrumentPreset>().is_err());
        assert_eq!(DenoiseConfig::for_instrument(InstrumentPreset::Tof).tolerance_da, 0.01);
    }

    #[test]
    fn test_validate_fails_fast() {
        let config = DenoiseConfig::default().with_tolerance(-0.01);
        assert_eq!(config.validate(), Err(ConfigError::NonPositiveTolerance(-0.01)));

        let config = DenoiseConfig::default().with_tolerance(f64::NAN);
        assert!(matches!(config.validate(), Err(ConfigError::NonPositiveTolerance(_))));

        let config = DenoiseConfig {
            satellite_window_da: -1.0,
            ..DenoiseConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSatelliteWindow(-1.0)));
    }

    #[test]
    fn test_validate_bounds_search_space() {
        assert!(DenoiseConfig::default().with_depth(MAX_CANDIDATE_DEPTH).validate().is_ok());
        assert_eq!(
            DenoiseConfig::default().with_depth(MAX_CANDIDATE_DEPTH + 1).validate(),
            Err(ConfigError::CandidateDepthTooLarge {
                depth: MAX_CANDIDATE_DEPTH + 1,
                max: MAX_CANDIDATE_DEPTH
            })
        );

        let config: DenoiseConfig = serde_json::from_str(r#"{"hydrogen_shift": 4294967295}"#).unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::HydrogenShiftTooLarge {
                shift: u32::MAX,
                max: MAX_HYDROGEN_SHIFT
            })
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DenoiseConfig =
            serde_json::from_str(r#"{"tolerance_da": 0.01, "exhaustion_policy": "strict"}"#).unwrap();
        assert_eq!(config.tolerance_da, 0.01);
        assert_eq!(config.exhaustion_policy, Policy::Strict);
        assert_eq!(config.satellite_policy, Policy::Permissive);
        assert_eq!(config.candidate_depth, DEFAULT_CANDIDATE_DEPTH);
        assert!(config.worker_count >= 1);

        let rejected = serde_json::from_str::<DenoiseConfig>(r#"{"satellite_policy": "lenient"}"#);
        assert!(rejected.is_err());
    }
}
