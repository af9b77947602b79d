//! Per-spectrum denoising.
//!
//! A [`DenoisingEngine`] walks one record through
//! `Pending -> CandidatesGenerated -> PeaksEvaluated -> Done`, or into `Failed` on
//! the first unrecoverable problem with the record. Candidates are generated once and
//! every peak is judged against that same set.

use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::algorithm::fragmentation::{generate_candidates, CandidateSet, Provenance};
use crate::algorithm::matching::{DecisionReason, MatchResult};
use crate::chemistry::adduct::Adduct;
use crate::chemistry::constants::MASS_ELECTRON;
use crate::chemistry::sum_formula::SumFormula;
use crate::data::smiles::MolecularGraph;
use crate::data::spectrum::{Peak, SpectralRecord, MAX_PRECURSOR_CHARGE};
use crate::denoise::config::DenoiseConfig;
use crate::error::RecordError;

/// Deviation between the stated and the computed precursor m/z worth a warning.
const PRECURSOR_MZ_DEVIATION_DA: f64 = 0.5;

/// Verdict on one peak of a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakDecision {
    /// position in the original peak list
    pub index: usize,
    pub mz: f64,
    pub intensity: f64,
    pub kept: bool,
    pub matched_candidate: Option<SumFormula>,
    pub mass_error: Option<f64>,
    pub charge: Option<u32>,
    pub reason: DecisionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl PeakDecision {
    fn unexplained(index: usize, peak: &Peak, kept: bool) -> Self {
        PeakDecision {
            index,
            mz: peak.mz,
            intensity: peak.intensity,
            kept,
            matched_candidate: None,
            mass_error: None,
            charge: None,
            reason: DecisionReason::NoCandidateInRange,
            provenance: None,
        }
    }
}

impl Display for PeakDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peak {} m/z {:.4}: {} ({})",
            self.index,
            self.mz,
            if self.kept { "kept" } else { "dropped" },
            self.reason
        )?;
        if let (Some(formula), Some(error)) = (&self.matched_candidate, self.mass_error) {
            write!(f, " {} {:+.5} Da", formula, error)?;
        }
        Ok(())
    }
}

/// A cleaned record together with the decision for every input peak.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenoisedSpectrum {
    pub record: SpectralRecord,
    pub decisions: Vec<PeakDecision>,
    /// no fragment candidate existed, every peak was resolved by the exhaustion policy
    pub exhausted: bool,
}

impl DenoisedSpectrum {
    pub fn peaks_in(&self) -> usize {
        self.decisions.len()
    }

    pub fn peaks_kept(&self) -> usize {
        self.record.peaks.len()
    }

    pub fn retention_ratio(&self) -> f64 {
        match self.peaks_in() {
            0 => 0.0,
            n => self.peaks_kept() as f64 / n as f64,
        }
    }
}

/// Parsed precursor of a record: ion formula, ion type and structure.
#[derive(Clone, Debug, PartialEq)]
pub struct Precursor {
    pub ion_formula: SumFormula,
    pub adduct: Adduct,
    pub structure: Option<MolecularGraph>,
}

impl Precursor {
    /// Parse and cross-check the precursor description of a record.
    ///
    /// Without an adduct the formula is taken as the ion formula and the charge
    /// comes from the record. A structure must have exactly the record's formula.
    pub fn from_record(record: &SpectralRecord) -> Result<Self, RecordError> {
        let formula = SumFormula::parse(&record.precursor_formula)?;

        let structure = match record.precursor_structure.as_deref().map(str::trim) {
            Some(smiles) if !smiles.is_empty() => {
                let graph = MolecularGraph::parse(smiles)?;
                let structure_formula = graph.formula();
                if structure_formula != formula {
                    return Err(RecordError::StructureMismatch {
                        structure: structure_formula.to_string(),
                        formula: formula.to_string(),
                    });
                }
                Some(graph)
            }
            _ => None,
        };

        let (adduct, ion_formula) = match record.adduct.as_deref().map(str::trim) {
            Some(notation) if !notation.is_empty() => {
                let adduct = Adduct::parse(notation)?;
                if adduct.charge.unsigned_abs() > MAX_PRECURSOR_CHARGE {
                    return Err(RecordError::InvalidCharge {
                        charge: adduct.charge,
                        max: MAX_PRECURSOR_CHARGE,
                    });
                }
                let ion_formula =
                    adduct
                        .ion_formula(&formula)
                        .map_err(|source| RecordError::AdductNotApplicable {
                            adduct: adduct.to_string(),
                            formula: formula.to_string(),
                            source,
                        })?;
                if adduct.charge != record.precursor_charge {
                    warn!(
                        "record {}: adduct {} implies charge {}, record states {}",
                        record.id.as_deref().unwrap_or("-"),
                        adduct,
                        adduct.charge,
                        record.precursor_charge
                    );
                }
                (adduct, ion_formula)
            }
            _ => (Adduct::from_charge(record.precursor_charge), formula),
        };

        Ok(Precursor {
            ion_formula,
            adduct,
            structure,
        })
    }

    pub fn charge(&self) -> i32 {
        self.adduct.charge
    }

    /// Theoretical m/z of the precursor ion.
    pub fn mz(&self) -> f64 {
        let charge = self.charge();
        (self.ion_formula.mass() - charge as f64 * MASS_ELECTRON) / charge.unsigned_abs().max(1) as f64
    }

    fn cache_key(&self, smiles: Option<&str>) -> CandidateKey {
        CandidateKey {
            ion_formula: self.ion_formula.clone(),
            structure: self.structure.as_ref().and(smiles).map(|s| s.trim().to_string()),
            carrier: self.adduct.charge_carrier(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CandidateKey {
    ion_formula: SumFormula,
    structure: Option<String>,
    carrier: (SumFormula, SumFormula),
}

/// Candidate sets already generated by one worker, keyed by precursor chemistry.
///
/// Only valid for a single configuration; a batch gives every worker its own cache.
#[derive(Debug, Default)]
pub struct CandidateCache {
    sets: HashMap<CandidateKey, Arc<CandidateSet>>,
    hits: usize,
}

impl CandidateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    fn get_or_generate(
        &mut self,
        precursor: &Precursor,
        structure: Option<&str>,
        config: &DenoiseConfig,
    ) -> Arc<CandidateSet> {
        let key = precursor.cache_key(structure);
        if let Some(set) = self.sets.get(&key) {
            self.hits += 1;
            return Arc::clone(set);
        }
        let set = Arc::new(generate_candidates(
            &precursor.ion_formula,
            precursor.structure.as_ref(),
            &precursor.adduct,
            &config.generator_settings(),
        ));
        self.sets.insert(key, Arc::clone(&set));
        set
    }
}

/// Lifecycle of one record.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineState {
    Pending,
    CandidatesGenerated {
        precursor: Box<Precursor>,
        candidates: Arc<CandidateSet>,
    },
    PeaksEvaluated {
        candidates: Arc<CandidateSet>,
        decisions: Vec<PeakDecision>,
    },
    Done(DenoisedSpectrum),
    Failed(RecordError),
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Pending => "pending",
            EngineState::CandidatesGenerated { .. } => "candidates-generated",
            EngineState::PeaksEvaluated { .. } => "peaks-evaluated",
            EngineState::Done(_) => "done",
            EngineState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Done(_) | EngineState::Failed(_))
    }
}

/// Denoises a single record. The record is borrowed and never modified.
pub struct DenoisingEngine<'a> {
    record: &'a SpectralRecord,
    config: &'a DenoiseConfig,
    state: EngineState,
}

impl<'a> DenoisingEngine<'a> {
    pub fn new(record: &'a SpectralRecord, config: &'a DenoiseConfig) -> Self {
        DenoisingEngine {
            record,
            config,
            state: EngineState::Pending,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Perform one state transition. Terminal states stay where they are.
    pub fn step(&mut self, cache: &mut CandidateCache) {
        let from = self.state.name();
        let state = std::mem::replace(&mut self.state, EngineState::Pending);
        self.state = match state {
            EngineState::Pending => match self.generate(cache) {
                Ok((precursor, candidates)) => EngineState::CandidatesGenerated {
                    precursor: Box::new(precursor),
                    candidates,
                },
                Err(e) => EngineState::Failed(e),
            },
            EngineState::CandidatesGenerated { precursor, candidates } => {
                let decisions = self.evaluate(&precursor, &candidates);
                EngineState::PeaksEvaluated { candidates, decisions }
            }
            EngineState::PeaksEvaluated { candidates, decisions } => {
                EngineState::Done(self.finish(&candidates, decisions))
            }
            terminal => terminal,
        };
        trace!("record {}: {} -> {}", self.label(), from, self.state.name());
    }

    /// Drive the record to a terminal state with a private cache.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::data::spectrum::{Peak, SpectralRecord};
    /// use msdenoise::denoise::config::DenoiseConfig;
    /// use msdenoise::denoise::engine::DenoisingEngine;
    ///
    /// let record = SpectralRecord::new(
    ///     "C9H11NO2",
    ///     165.0784,
    ///     1,
    ///     vec![Peak::new(120.081, 100.0), Peak::new(165.079, 40.0), Peak::new(199.5, 5.0)],
    /// );
    /// let config = DenoiseConfig::default();
    /// let denoised = DenoisingEngine::new(&record, &config).run().unwrap();
    /// assert_eq!(denoised.record.peaks.len(), 2);
    /// assert_eq!(record.peaks.len(), 3);
    /// ```
    pub fn run(self) -> Result<DenoisedSpectrum, RecordError> {
        let mut cache = CandidateCache::new();
        self.run_with_cache(&mut cache)
    }

    pub fn run_with_cache(mut self, cache: &mut CandidateCache) -> Result<DenoisedSpectrum, RecordError> {
        let record = self.record;
        let label = record.id.as_deref().unwrap_or("-");
        loop {
            match self.state {
                EngineState::Done(denoised) => {
                    debug!(
                        "record {}: kept {} of {} peaks",
                        label,
                        denoised.peaks_kept(),
                        denoised.peaks_in()
                    );
                    return Ok(denoised);
                }
                EngineState::Failed(e) => {
                    debug!("record {} failed: {}", label, e);
                    return Err(e);
                }
                _ => self.step(cache),
            }
        }
    }

    fn label(&self) -> &str {
        self.record.id.as_deref().unwrap_or("-")
    }

    fn generate(&self, cache: &mut CandidateCache) -> Result<(Precursor, Arc<CandidateSet>), RecordError> {
        let precursor = Precursor::from_record(self.record)?;
        self.record.validate()?;

        let expected_mz = precursor.mz();
        if (expected_mz - self.record.precursor_mz).abs() > PRECURSOR_MZ_DEVIATION_DA {
            warn!(
                "record {}: precursor m/z {:.4} does not match {} {} at {:.4}",
                self.label(),
                self.record.precursor_mz,
                precursor.ion_formula,
                precursor.adduct,
                expected_mz
            );
        }

        let candidates = cache.get_or_generate(&precursor, self.record.precursor_structure.as_deref(), self.config);
        trace!(
            "record {}: {} candidates for {}{}",
            self.label(),
            candidates.len(),
            precursor.ion_formula,
            if candidates.is_exhausted() { " (exhausted)" } else { "" }
        );
        Ok((precursor, candidates))
    }

    fn evaluate(&self, precursor: &Precursor, candidates: &CandidateSet) -> Vec<PeakDecision> {
        if candidates.is_exhausted() {
            let keep = self.config.exhaustion_policy.keeps();
            return self
                .record
                .peaks
                .iter()
                .enumerate()
                .map(|(index, peak)| PeakDecision::unexplained(index, peak, keep))
                .collect();
        }

        let matcher = self.config.matcher();
        self.record
            .peaks
            .iter()
            .enumerate()
            .map(|(index, peak)| {
                let result = matcher.match_peak(peak.mz, precursor.charge(), candidates);
                self.decide(index, peak, result)
            })
            .collect()
    }

    fn decide(&self, index: usize, peak: &Peak, result: MatchResult<'_>) -> PeakDecision {
        let (kept, reason) = match result.reason {
            DecisionReason::MatchedWithinTolerance | DecisionReason::AmbiguousKeptBest => (true, result.reason),
            DecisionReason::IsotopeSatellite if self.config.satellite_policy.keeps() => (true, result.reason),
            DecisionReason::IsotopeSatellite => (false, DecisionReason::AbovePrecursorMass),
            other => (false, other),
        };
        let (matched_candidate, mass_error, charge, provenance) = if kept {
            (
                result.candidate.map(|c| c.formula.clone()),
                result.mass_error,
                result.charge,
                result.candidate.map(|c| c.provenance.clone()),
            )
        } else {
            (None, None, None, None)
        };
        PeakDecision {
            index,
            mz: peak.mz,
            intensity: peak.intensity,
            kept,
            matched_candidate,
            mass_error,
            charge,
            reason,
            provenance,
        }
    }

    fn finish(&self, candidates: &CandidateSet, decisions: Vec<PeakDecision>) -> DenoisedSpectrum {
        let peaks = decisions
            .iter()
            .filter(|d| d.kept)
            .map(|d| self.record.peaks[d.index])
            .collect();
        DenoisedSpectrum {
            record: self.record.with_peaks(peaks),
            decisions,
            exhausted: candidates.is_exhausted(),
        }
    }
}

/// Denoise one record with its own candidate cache.
pub fn denoise_record(record: &SpectralRecord, config: &DenoiseConfig) -> Result<DenoisedSpectrum, RecordError> {
    DenoisingEngine::new(record, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::config::Policy;
    use crate::error::RecordErrorKind;

    fn phenylalanine(peaks: &[f64]) -> SpectralRecord {
        SpectralRecord::new(
            "C9H11NO2",
            165.0784,
            1,
            peaks.iter().map(|&mz| Peak::new(mz, 100.0)).collect(),
        )
        .with_id("phe")
    }

    #[test]
    fn test_phenylalanine_formula_only() {
        let record = phenylalanine(&[120.081, 165.079, 199.5]);
        let config = DenoiseConfig::default().with_tolerance(0.005).with_depth(2);
        let denoised = denoise_record(&record, &config).unwrap();

        let kept: Vec<f64> = denoised.record.peaks.iter().map(|p| p.mz).collect();
        assert_eq!(kept, vec![120.081, 165.079]);
        assert_eq!(denoised.decisions.len(), 3);

        let dropped = &denoised.decisions[2];
        assert!(!dropped.kept);
        assert_eq!(dropped.reason, DecisionReason::NoCandidateInRange);
        assert!(dropped.matched_candidate.is_none());

        let immonium = &denoised.decisions[0];
        assert_eq!(immonium.matched_candidate.as_ref().unwrap().to_string(), "C8H10N");
        assert!(immonium.mass_error.unwrap().abs() <= 0.005);
        assert_eq!(immonium.charge, Some(1));
    }

    #[test]
    fn test_phenylalanine_with_structure() {
        let record = phenylalanine(&[120.081, 165.079, 199.5]).with_structure("NC(Cc1ccccc1)C(=O)O");
        let config = DenoiseConfig::default().with_depth(1);
        let denoised = denoise_record(&record, &config).unwrap();
        assert_eq!(denoised.peaks_kept(), 2);
        let immonium = &denoised.decisions[0];
        assert_eq!(immonium.matched_candidate.as_ref().unwrap().to_string(), "C8H10N");
        assert!(matches!(immonium.provenance, Some(Provenance::BondCleavage { .. })));
    }

    #[test]
    fn test_exhausted_candidates_follow_policy() {
        // no catalog loss applies to a bare carbon
        let record = SpectralRecord::new("C", 12.0, 1, vec![Peak::new(12.0, 10.0), Peak::new(6.0, 1.0)]);

        let strict = DenoiseConfig {
            exhaustion_policy: Policy::Strict,
            ..DenoiseConfig::default()
        };
        let denoised = denoise_record(&record, &strict).unwrap();
        assert!(denoised.exhausted);
        assert_eq!(denoised.retention_ratio(), 0.0);
        assert!(denoised.record.peaks.is_empty());
        assert!(denoised
            .decisions
            .iter()
            .all(|d| !d.kept && d.reason == DecisionReason::NoCandidateInRange));

        let permissive = DenoiseConfig::default();
        let denoised = denoise_record(&record, &permissive).unwrap();
        assert_eq!(denoised.retention_ratio(), 1.0);
        assert!(denoised.decisions.iter().all(|d| d.reason == DecisionReason::NoCandidateInRange));
    }

    #[test]
    fn test_satellite_policy() {
        let precursor_mz = SumFormula::parse("C9H11NO2").unwrap().mass() - MASS_ELECTRON;
        let satellite = precursor_mz + crate::chemistry::constants::MASS_C13_SPACING;
        let record = phenylalanine(&[precursor_mz, satellite]);

        let denoised = denoise_record(&record, &DenoiseConfig::default()).unwrap();
        assert_eq!(denoised.decisions[1].reason, DecisionReason::IsotopeSatellite);
        assert!(denoised.decisions[1].kept);

        let strict = DenoiseConfig {
            satellite_policy: Policy::Strict,
            ..DenoiseConfig::default()
        };
        let denoised = denoise_record(&record, &strict).unwrap();
        assert_eq!(denoised.decisions[1].reason, DecisionReason::AbovePrecursorMass);
        assert!(!denoised.decisions[1].kept);
        assert_eq!(denoised.peaks_kept(), 1);
    }

    #[test]
    fn test_failures_are_terminal() {
        let config = DenoiseConfig::default();

        let record = SpectralRecord::new("C9H11NO2X", 165.0, 1, vec![Peak::new(100.0, 1.0)]);
        let err = denoise_record(&record, &config).unwrap_err();
        assert_eq!(err.kind(), RecordErrorKind::MalformedFormula);

        let record = SpectralRecord::new("C9H11NO2", 165.0, 1, vec![]);
        assert_eq!(denoise_record(&record, &config).unwrap_err(), RecordError::EmptyPeakList);

        let record = phenylalanine(&[120.0]).with_structure("NC(C");
        assert_eq!(
            denoise_record(&record, &config).unwrap_err().kind(),
            RecordErrorKind::MalformedStructure
        );

        let record = phenylalanine(&[120.0]).with_structure("CCO");
        assert_eq!(
            denoise_record(&record, &config).unwrap_err().kind(),
            RecordErrorKind::StructureMismatch
        );

        let record = phenylalanine(&[120.0]).with_adduct("[M+Xx]+");
        assert_eq!(
            denoise_record(&record, &config).unwrap_err().kind(),
            RecordErrorKind::MalformedAdduct
        );
    }

    #[test]
    fn test_out_of_range_precursors_fail() {
        let config = DenoiseConfig::default();

        let record = phenylalanine(&[120.0]).with_adduct("[M]50+");
        assert!(matches!(
            denoise_record(&record, &config),
            Err(RecordError::InvalidCharge { charge: 50, .. })
        ));

        let mut record = phenylalanine(&[120.0]);
        record.precursor_charge = MAX_PRECURSOR_CHARGE as i32 + 1;
        assert_eq!(
            denoise_record(&record, &config).unwrap_err().kind(),
            RecordErrorKind::InvalidCharge
        );

        let record = phenylalanine(&[120.0]).with_adduct("[M+3000000000H2]+");
        assert_eq!(
            denoise_record(&record, &config).unwrap_err().kind(),
            RecordErrorKind::MalformedAdduct
        );

        let record = phenylalanine(&[120.0]).with_adduct("[3000000000M+H]+");
        assert_eq!(
            denoise_record(&record, &config).unwrap_err().kind(),
            RecordErrorKind::AdductNotApplicable
        );
    }

    #[test]
    fn test_state_machine_transitions() {
        let record = phenylalanine(&[120.081]);
        let config = DenoiseConfig::default();
        let mut cache = CandidateCache::new();
        let mut engine = DenoisingEngine::new(&record, &config);

        let mut names = vec![engine.state().name()];
        while !engine.state().is_terminal() {
            engine.step(&mut cache);
            names.push(engine.state().name());
        }
        assert_eq!(names, vec!["pending", "candidates-generated", "peaks-evaluated", "done"]);

        engine.step(&mut cache);
        assert_eq!(engine.state().name(), "done");
    }

    #[test]
    fn test_adduct_record() {
        // protonated phenylalanine, immonium ion at 120.0808
        let record = SpectralRecord::new(
            "C9H11NO2",
            166.0863,
            1,
            vec![Peak::new(120.0808, 100.0), Peak::new(166.0863, 50.0), Peak::new(131.3, 1.0)],
        )
        .with_adduct("[M+H]+");
        let denoised = denoise_record(&record, &DenoiseConfig::default()).unwrap();
        assert!(denoised.decisions[0].kept);
        assert!(denoised.decisions[1].kept);
        assert_eq!(
            denoised.decisions[1].matched_candidate.as_ref().unwrap().to_string(),
            "C9H12NO2"
        );
        assert!(!denoised.decisions[2].kept);
    }

    #[test]
    fn test_cache_reuses_candidates() {
        let config = DenoiseConfig::default();
        let mut cache = CandidateCache::new();
        let a = phenylalanine(&[120.081]);
        let b = phenylalanine(&[165.079]).with_id("phe-2");
        DenoisingEngine::new(&a, &config).run_with_cache(&mut cache).unwrap();
        DenoisingEngine::new(&b, &config).run_with_cache(&mut cache).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);

        let c = phenylalanine(&[120.081]).with_adduct("[M+H]+");
        DenoisingEngine::new(&c, &config).run_with_cache(&mut cache).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let record = phenylalanine(&[91.054, 103.054, 120.081, 131.049, 165.079, 166.0, 199.5]);
        let config = DenoiseConfig::default();
        let first = denoise_record(&record, &config).unwrap();
        let second = denoise_record(&record, &config).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
