use std::cmp::Ordering;
use std::fmt;
use std::fmt::{Display, Formatter};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::algorithm::fragmentation::{CandidateSet, FragmentCandidate};
use crate::chemistry::constants::{MASS_C13_SPACING, MASS_ELECTRON, TOLERANCE_SLACK};
use crate::data::spectrum::MAX_PRECURSOR_CHARGE;

/// Why a peak was kept or dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    MatchedWithinTolerance,
    NoCandidateInRange,
    AbovePrecursorMass,
    AmbiguousKeptBest,
    IsotopeSatellite,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::MatchedWithinTolerance => "matched-within-tolerance",
            DecisionReason::NoCandidateInRange => "no-candidate-in-range",
            DecisionReason::AbovePrecursorMass => "above-precursor-mass",
            DecisionReason::AmbiguousKeptBest => "ambiguous-kept-best",
            DecisionReason::IsotopeSatellite => "isotope-satellite",
        }
    }
}

impl Display for DecisionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of matching one peak against a candidate set.
///
/// `candidate`, `mass_error` and `charge` are set for matches and isotope satellites,
/// where the candidate of a satellite is the precursor itself.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult<'a> {
    pub reason: DecisionReason,
    pub candidate: Option<&'a FragmentCandidate>,
    /// observed neutral mass minus candidate mass, in Da
    pub mass_error: Option<f64>,
    pub charge: Option<u32>,
    /// distinct candidate formulas found within tolerance
    pub alternatives: usize,
}

impl<'a> MatchResult<'a> {
    fn unmatched(reason: DecisionReason) -> Self {
        MatchResult {
            reason,
            candidate: None,
            mass_error: None,
            charge: None,
            alternatives: 0,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(
            self.reason,
            DecisionReason::MatchedWithinTolerance | DecisionReason::AmbiguousKeptBest
        )
    }
}

/// Neutral-equivalent mass of an ion observed at `mz` carrying `charge` charges of
/// the given polarity: the electrons lost (or gained) on ionisation are put back.
///
/// # Example
///
/// ```
/// use msdenoise::algorithm::matching::neutral_mass;
/// use msdenoise::chemistry::constants::MASS_ELECTRON;
///
/// assert_eq!(neutral_mass(100.0, 1, 1), 100.0 + MASS_ELECTRON);
/// assert_eq!(neutral_mass(100.0, 2, -1), 2.0 * (100.0 - MASS_ELECTRON));
/// ```
pub fn neutral_mass(mz: f64, charge: u32, polarity: i32) -> f64 {
    let sign = if polarity < 0 { -1.0 } else { 1.0 };
    charge as f64 * (mz + sign * MASS_ELECTRON)
}

/// Matches observed peaks against fragment candidates within an absolute tolerance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakMatcher {
    pub tolerance_da: f64,
    /// how far above the precursor mass peaks are still considered precursor satellites
    pub satellite_window_da: f64,
}

impl PeakMatcher {
    pub fn new(tolerance_da: f64, satellite_window_da: f64) -> Self {
        PeakMatcher {
            tolerance_da,
            satellite_window_da,
        }
    }

    /// Match one peak.
    ///
    /// The peak is tried at every fragment charge from 1 up to `|charge|`, at most
    /// [`MAX_PRECURSOR_CHARGE`]. Among the
    /// candidates within tolerance the best has the smallest absolute mass error, then
    /// the lowest depth, then the lowest charge, then the lowest formula.
    ///
    /// Without a match, a peak whose singly charged neutral mass exceeds the precursor
    /// mass is classified by the satellite window: inside it the peak is an isotope satellite
    /// when it sits on a 13C spacing of the precursor, otherwise it is above the
    /// precursor mass. Beyond the window no candidate can exist.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::algorithm::fragmentation::{generate_candidates, GeneratorSettings};
    /// use msdenoise::algorithm::matching::{DecisionReason, PeakMatcher};
    /// use msdenoise::chemistry::adduct::Adduct;
    /// use msdenoise::chemistry::sum_formula::SumFormula;
    ///
    /// let precursor = SumFormula::parse("C9H11NO2").unwrap();
    /// let candidates = generate_candidates(&precursor, None, &Adduct::from_charge(1), &GeneratorSettings::default());
    /// let matcher = PeakMatcher::new(0.005, 3.0);
    ///
    /// let result = matcher.match_peak(120.081, 1, &candidates);
    /// assert!(result.is_match());
    /// assert_eq!(result.candidate.unwrap().formula.to_string(), "C8H10N");
    ///
    /// let result = matcher.match_peak(199.5, 1, &candidates);
    /// assert_eq!(result.reason, DecisionReason::NoCandidateInRange);
    /// ```
    pub fn match_peak<'a>(&self, peak_mz: f64, charge: i32, candidates: &'a CandidateSet) -> MatchResult<'a> {
        let max_charge = charge.unsigned_abs().clamp(1, MAX_PRECURSOR_CHARGE);
        let ceiling = candidates.precursor_mass() + self.tolerance_da + TOLERANCE_SLACK;

        let mut best: Option<(&'a FragmentCandidate, f64, u32)> = None;
        let mut matched_formulas = Vec::new();
        for z in 1..=max_charge {
            let mass = neutral_mass(peak_mz, z, charge);
            if mass > ceiling {
                continue;
            }
            for candidate in candidates.within(mass, self.tolerance_da) {
                let error = mass - candidate.mass;
                if !matched_formulas.contains(&&candidate.formula) {
                    matched_formulas.push(&candidate.formula);
                }
                let better = match best {
                    None => true,
                    Some((current, current_error, current_z)) => {
                        compare_matches((candidate, error, z), (current, current_error, current_z)) == Ordering::Less
                    }
                };
                if better {
                    best = Some((candidate, error, z));
                }
            }
        }

        if let Some((candidate, error, z)) = best {
            let reason = if matched_formulas.len() > 1 {
                DecisionReason::AmbiguousKeptBest
            } else {
                DecisionReason::MatchedWithinTolerance
            };
            return MatchResult {
                reason,
                candidate: Some(candidate),
                mass_error: Some(error),
                charge: Some(z),
                alternatives: matched_formulas.len(),
            };
        }

        self.classify_unmatched(peak_mz, charge, candidates)
    }

    // unmatched peaks are judged as singly charged ions
    fn classify_unmatched<'a>(&self, peak_mz: f64, charge: i32, candidates: &'a CandidateSet) -> MatchResult<'a> {
        let excess = neutral_mass(peak_mz, 1, charge) - candidates.precursor_mass();
        if excess <= self.tolerance_da + TOLERANCE_SLACK || excess > self.satellite_window_da + TOLERANCE_SLACK {
            return MatchResult::unmatched(DecisionReason::NoCandidateInRange);
        }
        let isotope = (excess / MASS_C13_SPACING).round();
        let error = excess - isotope * MASS_C13_SPACING;
        if isotope >= 1.0 && error.abs() <= self.tolerance_da + TOLERANCE_SLACK {
            return MatchResult {
                reason: DecisionReason::IsotopeSatellite,
                candidate: candidates.get(candidates.precursor()),
                mass_error: Some(error),
                charge: Some(1),
                alternatives: 0,
            };
        }
        MatchResult::unmatched(DecisionReason::AbovePrecursorMass)
    }
}

fn compare_matches(a: (&FragmentCandidate, f64, u32), b: (&FragmentCandidate, f64, u32)) -> Ordering {
    OrderedFloat(a.1.abs())
        .cmp(&OrderedFloat(b.1.abs()))
        .then(a.0.depth.cmp(&b.0.depth))
        .then(a.2.cmp(&b.2))
        .then_with(|| a.0.formula.cmp(&b.0.formula))
}

/// Match a peak with default satellite handling.
///
/// # Arguments
///
/// * `peak_mz` - observed m/z
/// * `charge` - precursor charge, sign is the polarity
/// * `candidates` - candidate set of the precursor
/// * `tolerance_da` - absolute mass tolerance in Da, inclusive
///
/// # Returns
///
/// * `MatchResult` - the best candidate or the reason there is none
pub fn match_peak(peak_mz: f64, charge: i32, candidates: &CandidateSet, tolerance_da: f64) -> MatchResult<'_> {
    PeakMatcher::new(tolerance_da, crate::denoise::config::DEFAULT_SATELLITE_WINDOW_DA).match_peak(peak_mz, charge, candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::fragmentation::{generate_candidates, GeneratorSettings};
    use crate::chemistry::adduct::Adduct;
    use crate::chemistry::sum_formula::SumFormula;

    fn phenylalanine() -> CandidateSet {
        let precursor = SumFormula::parse("C9H11NO2").unwrap();
        generate_candidates(&precursor, None, &Adduct::from_charge(1), &GeneratorSettings::default())
    }

    // m/z at which a singly charged cation of the given candidate mass is observed
    fn cation_mz(mass: f64) -> f64 {
        mass - MASS_ELECTRON
    }

    #[test]
    fn test_precursor_peak_matches_sentinel() {
        let candidates = phenylalanine();
        let result = match_peak(165.079, 1, &candidates, 0.005);
        assert!(result.is_match());
        assert_eq!(result.candidate.unwrap().formula.to_string(), "C9H11NO2");
        assert_eq!(result.charge, Some(1));
        assert!(result.mass_error.unwrap().abs() < 0.005);
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        let candidates = phenylalanine();
        let target = candidates.get(&SumFormula::parse("C8H10N").unwrap()).unwrap().mass;
        let tolerance = 0.005;

        let at_boundary = match_peak(cation_mz(target) + tolerance, 1, &candidates, tolerance);
        assert_eq!(at_boundary.candidate.map(|c| c.mass), Some(target));

        let beyond = match_peak(cation_mz(target) + tolerance + 1e-6, 1, &candidates, tolerance);
        assert_ne!(beyond.candidate.map(|c| c.formula.to_string()), Some("C8H10N".to_string()));
    }

    #[test]
    fn test_tie_break_prefers_smallest_error() {
        let candidates = phenylalanine();
        // wide tolerance catches several neighbours around the immonium ion
        let result = match_peak(120.081, 1, &candidates, 0.05);
        assert_eq!(result.candidate.unwrap().formula.to_string(), "C8H10N");
        if result.alternatives > 1 {
            assert_eq!(result.reason, DecisionReason::AmbiguousKeptBest);
        }
    }

    #[test]
    fn test_above_precursor_classification() {
        let candidates = phenylalanine();
        let precursor = candidates.precursor_mass();
        let matcher = PeakMatcher::new(0.005, 3.0);

        let satellite = matcher.match_peak(cation_mz(precursor + MASS_C13_SPACING), 1, &candidates);
        assert_eq!(satellite.reason, DecisionReason::IsotopeSatellite);
        assert_eq!(satellite.candidate.unwrap().formula.to_string(), "C9H11NO2");

        let second = matcher.match_peak(cation_mz(precursor + 2.0 * MASS_C13_SPACING), 1, &candidates);
        assert_eq!(second.reason, DecisionReason::IsotopeSatellite);

        let off_spacing = matcher.match_peak(cation_mz(precursor + 0.5), 1, &candidates);
        assert_eq!(off_spacing.reason, DecisionReason::AbovePrecursorMass);

        let far = matcher.match_peak(cation_mz(precursor + 30.0), 1, &candidates);
        assert_eq!(far.reason, DecisionReason::NoCandidateInRange);
    }

    #[test]
    fn test_multiply_charged_fragment() {
        let precursor = SumFormula::parse("C18H22N2O4").unwrap();
        let candidates =
            generate_candidates(&precursor, None, &Adduct::from_charge(2), &GeneratorSettings::default());
        let mass = candidates.get(&precursor).unwrap().mass;
        let result = match_peak(mass / 2.0 - MASS_ELECTRON, 2, &candidates, 0.005);
        assert_eq!(result.charge, Some(2));
        assert_eq!(result.candidate.unwrap().formula, precursor);
    }

    #[test]
    fn test_unmatched_peaks_are_classified_singly_charged() {
        let precursor = SumFormula::parse("C18H22N2O4").unwrap();
        let candidates =
            generate_candidates(&precursor, None, &Adduct::from_charge(2), &GeneratorSettings::default());
        let mass = candidates.precursor_mass();
        let matcher = PeakMatcher::new(0.005, 3.0);

        // a doubly charged 13C peak sits far below the precursor mass as a 1+ ion
        let doubly = matcher.match_peak((mass + MASS_C13_SPACING) / 2.0 - MASS_ELECTRON, 2, &candidates);
        assert_eq!(doubly.reason, DecisionReason::NoCandidateInRange);

        let singly = matcher.match_peak(cation_mz(mass + MASS_C13_SPACING), 2, &candidates);
        assert_eq!(singly.reason, DecisionReason::IsotopeSatellite);
        assert_eq!(singly.charge, Some(1));
    }

    #[test]
    fn test_fragment_charges_are_bounded() {
        let candidates = phenylalanine();
        let mass = candidates.get(&SumFormula::parse("C8H10N").unwrap()).unwrap().mass;
        let matcher = PeakMatcher::new(0.005, 3.0);

        let z = MAX_PRECURSOR_CHARGE;
        let within = matcher.match_peak(mass / z as f64 - MASS_ELECTRON, i32::MAX, &candidates);
        assert_eq!(within.charge, Some(z));

        let beyond = matcher.match_peak(mass / (z + 1) as f64 - MASS_ELECTRON, i32::MAX, &candidates);
        assert_ne!(beyond.charge, Some(z + 1));
    }

    #[test]
    fn test_negative_mode_conversion() {
        let precursor = SumFormula::parse("C9H10NO2").unwrap();
        let candidates =
            generate_candidates(&precursor, None, &Adduct::from_charge(-1), &GeneratorSettings::default());
        let mz = candidates.precursor_mass() + MASS_ELECTRON;
        let result = match_peak(mz, -1, &candidates, 0.001);
        assert!(result.is_match());
        assert!(result.mass_error.unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_reason_serialization() {
        let json = serde_json::to_string(&DecisionReason::NoCandidateInRange).unwrap();
        assert_eq!(json, "\"no-candidate-in-range\"");
        assert_eq!(DecisionReason::IsotopeSatellite.to_string(), "isotope-satellite");
    }
}
