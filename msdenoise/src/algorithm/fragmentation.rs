use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::chemistry::adduct::Adduct;
use crate::chemistry::constants::{MASS_COALESCE_EPSILON, TOLERANCE_SLACK};
use crate::chemistry::neutral_loss::{neutral_loss_catalog, NeutralLoss};
use crate::chemistry::sum_formula::SumFormula;
use crate::data::smiles::MolecularGraph;

/// How a fragment candidate was derived from the precursor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Provenance {
    /// the intact precursor ion
    Precursor,
    /// the bare charge carrier, lower boundary of the candidate masses
    Empty,
    NeutralLoss { losses: Vec<String> },
    BondCleavage { bonds: Vec<usize>, hydrogen_shift: i32 },
}

impl Display for Provenance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Precursor => write!(f, "precursor"),
            Provenance::Empty => write!(f, "empty"),
            Provenance::NeutralLoss { losses } => write!(f, "loss of {}", losses.join(" + ")),
            Provenance::BondCleavage { bonds, hydrogen_shift } => {
                write!(f, "cleavage of bonds {:?}", bonds)?;
                if *hydrogen_shift != 0 {
                    write!(f, " with {:+} H", hydrogen_shift)?;
                }
                Ok(())
            }
        }
    }
}

/// A hypothesised fragment ion: its elemental formula, the formula's monoisotopic mass,
/// and how many cleavages or losses it took to reach it from the precursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FragmentCandidate {
    pub formula: SumFormula,
    pub mass: f64,
    pub depth: usize,
    pub provenance: Provenance,
}

impl FragmentCandidate {
    pub fn new(formula: SumFormula, depth: usize, provenance: Provenance) -> Self {
        let mass = formula.mass();
        FragmentCandidate {
            formula,
            mass,
            depth,
            provenance,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self.provenance, Provenance::Precursor | Provenance::Empty)
    }
}

/// Deepest combination of cleavages or losses ever enumerated.
pub const MAX_CANDIDATE_DEPTH: usize = 4;
/// Largest hydrogen rearrangement ever tried around a cleavage product.
pub const MAX_HYDROGEN_SHIFT: u32 = 3;

/// Knobs of candidate generation.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorSettings {
    /// maximum number of sequential cleavages or neutral losses
    pub depth: usize,
    /// hydrogen rearrangements tried around every cleavage product
    pub hydrogen_shift: u32,
    pub strict_valence: bool,
}

impl GeneratorSettings {
    /// The settings with depth and hydrogen shift held to their maxima.
    pub fn clamped(&self) -> GeneratorSettings {
        GeneratorSettings {
            depth: self.depth.min(MAX_CANDIDATE_DEPTH),
            hydrogen_shift: self.hydrogen_shift.min(MAX_HYDROGEN_SHIFT),
            strict_valence: self.strict_valence,
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        GeneratorSettings {
            depth: 2,
            hydrogen_shift: 1,
            strict_valence: false,
        }
    }
}

/// All fragment candidates of one precursor, unique by formula and sorted by mass.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateSet {
    precursor: SumFormula,
    precursor_mass: f64,
    candidates: Vec<FragmentCandidate>,
    exhausted: bool,
}

impl CandidateSet {
    pub fn precursor(&self) -> &SumFormula {
        &self.precursor
    }

    pub fn precursor_mass(&self) -> f64 {
        self.precursor_mass
    }

    pub fn candidates(&self) -> &[FragmentCandidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// True when nothing beyond the sentinels was reachable, i.e. no peak can be validated.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn get(&self, formula: &SumFormula) -> Option<&FragmentCandidate> {
        self.candidates.iter().find(|c| &c.formula == formula)
    }

    /// Candidates whose mass lies within `tolerance` of `mass`, bounds inclusive.
    pub fn within(&self, mass: f64, tolerance: f64) -> &[FragmentCandidate] {
        let lower = mass - tolerance - TOLERANCE_SLACK;
        let upper = mass + tolerance + TOLERANCE_SLACK;
        let start = self.candidates.partition_point(|c| c.mass < lower);
        let end = self.candidates.partition_point(|c| c.mass <= upper);
        &self.candidates[start..end.max(start)]
    }
}

// keeps the simplest candidate per formula
struct CandidateCollector {
    by_formula: BTreeMap<SumFormula, FragmentCandidate>,
}

impl CandidateCollector {
    fn new() -> Self {
        CandidateCollector {
            by_formula: BTreeMap::new(),
        }
    }

    fn offer(&mut self, candidate: FragmentCandidate) {
        match self.by_formula.get(&candidate.formula) {
            Some(existing) if existing.depth <= candidate.depth => {}
            _ => {
                self.by_formula.insert(candidate.formula.clone(), candidate);
            }
        }
    }

    fn finish(self, precursor: SumFormula) -> CandidateSet {
        let mut sorted: Vec<FragmentCandidate> = self.by_formula.into_values().collect();
        sorted.sort_by(|a, b| {
            OrderedFloat(a.mass)
                .cmp(&OrderedFloat(b.mass))
                .then(a.depth.cmp(&b.depth))
                .then_with(|| a.formula.cmp(&b.formula))
        });

        let mut candidates: Vec<FragmentCandidate> = Vec::with_capacity(sorted.len());
        for candidate in sorted {
            match candidates.last_mut() {
                Some(last) if (candidate.mass - last.mass).abs() < MASS_COALESCE_EPSILON => {
                    if candidate.depth < last.depth {
                        *last = candidate;
                    }
                }
                _ => candidates.push(candidate),
            }
        }

        let exhausted = candidates.iter().all(|c| c.is_sentinel());
        let precursor_mass = precursor.mass();
        CandidateSet {
            precursor,
            precursor_mass,
            candidates,
            exhausted,
        }
    }
}

/// Enumerate the fragment candidates reachable from a precursor ion.
///
/// With a structure, fragments come from breaking up to `settings.depth` cleavable
/// bonds; every resulting component carries the adduct's charge carrier and is tried
/// with up to `settings.hydrogen_shift` hydrogens gained or lost. Without a structure,
/// combinations of up to `settings.depth` catalog neutral losses are subtracted from
/// the precursor ion. Either way the precursor ion and the bare charge carrier are
/// included, and only candidates that are sub-formulas of the precursor ion survive.
/// Depth and hydrogen shift beyond [`MAX_CANDIDATE_DEPTH`] and [`MAX_HYDROGEN_SHIFT`]
/// are clamped.
///
/// # Example
///
/// ```
/// use msdenoise::algorithm::fragmentation::{generate_candidates, GeneratorSettings};
/// use msdenoise::chemistry::adduct::Adduct;
/// use msdenoise::chemistry::sum_formula::SumFormula;
///
/// let precursor = SumFormula::parse("C9H11NO2").unwrap();
/// let candidates = generate_candidates(&precursor, None, &Adduct::from_charge(1), &GeneratorSettings::default());
/// let water_loss = SumFormula::parse("C9H9NO").unwrap();
/// assert!(candidates.get(&water_loss).is_some());
/// assert!(!candidates.is_exhausted());
/// ```
pub fn generate_candidates(
    precursor_ion: &SumFormula,
    structure: Option<&MolecularGraph>,
    adduct: &Adduct,
    settings: &GeneratorSettings,
) -> CandidateSet {
    let settings = &settings.clamped();
    let mut collector = CandidateCollector::new();

    let (carrier_added, _) = adduct.charge_carrier();
    collector.offer(FragmentCandidate::new(precursor_ion.clone(), 0, Provenance::Precursor));
    collector.offer(FragmentCandidate::new(carrier_added, 0, Provenance::Empty));

    match structure {
        Some(graph) => bond_cleavage_candidates(graph, precursor_ion, adduct, settings, &mut collector),
        None => neutral_loss_candidates(precursor_ion, settings, &mut collector),
    }

    collector.finish(precursor_ion.clone())
}

fn neutral_loss_candidates(precursor_ion: &SumFormula, settings: &GeneratorSettings, collector: &mut CandidateCollector) {
    let catalog = neutral_loss_catalog();
    let mut chosen: Vec<&NeutralLoss> = Vec::with_capacity(settings.depth);
    extend_losses(precursor_ion, catalog, 0, &SumFormula::empty(), &mut chosen, settings, collector);
}

// depth-first over multisets of catalog losses; a loss that is not a sub-formula
// of the precursor cannot become reachable by adding more losses
fn extend_losses<'a>(
    precursor_ion: &SumFormula,
    catalog: &'a [NeutralLoss],
    start: usize,
    total: &SumFormula,
    chosen: &mut Vec<&'a NeutralLoss>,
    settings: &GeneratorSettings,
    collector: &mut CandidateCollector,
) {
    if chosen.len() == settings.depth {
        return;
    }
    for (index, loss) in catalog.iter().enumerate().skip(start) {
        let Ok(combined) = total.add(&loss.formula) else {
            continue;
        };
        let Ok(fragment) = precursor_ion.subtract(&combined) else {
            continue;
        };
        chosen.push(loss);
        if !fragment.is_empty() && combined.is_valid_loss(settings.strict_valence) {
            let losses = chosen.iter().map(|l| l.name.to_string()).collect();
            collector.offer(FragmentCandidate::new(fragment, chosen.len(), Provenance::NeutralLoss { losses }));
        }
        extend_losses(precursor_ion, catalog, index, &combined, chosen, settings, collector);
        chosen.pop();
    }
}

fn bond_cleavage_candidates(
    graph: &MolecularGraph,
    precursor_ion: &SumFormula,
    adduct: &Adduct,
    settings: &GeneratorSettings,
    collector: &mut CandidateCollector,
) {
    let (carrier_added, carrier_removed) = adduct.charge_carrier();
    let shift = settings.hydrogen_shift.min(MAX_HYDROGEN_SHIFT) as i32;
    let cleavable = graph.cleavable_bonds();

    for depth in 1..=settings.depth.min(cleavable.len()) {
        for bonds in cleavable.iter().copied().combinations(depth) {
            let components = graph.components_without(&bonds);
            // an opened ring without a split keeps the precursor formula
            if components.len() < 2 {
                continue;
            }
            for component in &components {
                let neutral = graph.formula_of(component);
                let Ok(with_carrier) = neutral.add(&carrier_added) else {
                    continue;
                };
                let Ok(ion) = with_carrier.subtract(&carrier_removed) else {
                    continue;
                };
                for hydrogen_shift in -shift..=shift {
                    let Some(shifted) = shift_hydrogens(&ion, hydrogen_shift) else {
                        continue;
                    };
                    if shifted.is_empty() || !shifted.is_subformula_of(precursor_ion) {
                        continue;
                    }
                    collector.offer(FragmentCandidate::new(
                        shifted,
                        depth,
                        Provenance::BondCleavage {
                            bonds: bonds.clone(),
                            hydrogen_shift,
                        },
                    ));
                }
            }
        }
    }
}

fn shift_hydrogens(formula: &SumFormula, shift: i32) -> Option<SumFormula> {
    let hydrogens = SumFormula::from_counts([("H", shift.unsigned_abs())]);
    if shift >= 0 {
        formula.add(&hydrogens).ok()
    } else {
        formula.subtract(&hydrogens).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(text: &str) -> SumFormula {
        SumFormula::parse(text).unwrap()
    }

    #[test]
    fn test_sentinels_always_present() {
        let precursor = formula("C9H11NO2");
        let settings = GeneratorSettings { depth: 0, ..Default::default() };
        let set = generate_candidates(&precursor, None, &Adduct::from_charge(1), &settings);
        assert_eq!(set.len(), 2);
        assert!(set.is_exhausted());
        assert_eq!(set.get(&precursor).unwrap().provenance, Provenance::Precursor);
        assert_eq!(set.get(&SumFormula::empty()).unwrap().provenance, Provenance::Empty);
    }

    #[test]
    fn test_loss_catalog_exhaustion() {
        // a lone carbon loses nothing from the catalog
        let set = generate_candidates(&formula("C"), None, &Adduct::from_charge(1), &GeneratorSettings::default());
        assert!(set.is_exhausted());
    }

    #[test]
    fn test_neutral_losses_depth() {
        let precursor = formula("C9H11NO2");
        let settings = GeneratorSettings { depth: 2, ..Default::default() };
        let set = generate_candidates(&precursor, None, &Adduct::from_charge(1), &settings);

        // formic acid is a catalog entry, carboxyl radical needs two steps
        let immonium_neutral = set.get(&formula("C8H9N")).unwrap();
        assert_eq!(immonium_neutral.depth, 1);
        let immonium = set.get(&formula("C8H10N")).unwrap();
        assert_eq!(immonium.depth, 2);

        for candidate in set.candidates() {
            assert!(candidate.formula.is_subformula_of(&precursor));
            assert!(candidate.depth <= 2);
        }
        // sorted by mass
        assert!(set.candidates().windows(2).all(|w| w[0].mass <= w[1].mass));
    }

    #[test]
    fn test_bond_cleavage() {
        let graph = MolecularGraph::parse("NC(Cc1ccccc1)C(=O)O").unwrap();
        let precursor = graph.formula();
        let settings = GeneratorSettings { depth: 1, hydrogen_shift: 1, strict_valence: false };
        let set = generate_candidates(&precursor, Some(&graph), &Adduct::from_charge(1), &settings);

        let immonium = set.get(&formula("C8H10N")).unwrap();
        assert_eq!(immonium.depth, 1);
        assert!(matches!(immonium.provenance, Provenance::BondCleavage { hydrogen_shift: 0, .. }));

        // benzyl cation and its hydrogen-shifted tropylium neighbour
        assert!(set.get(&formula("C7H7")).is_some());
        assert!(set.get(&formula("C7H8")).is_some());
        assert!(!set.is_exhausted());
    }

    #[test]
    fn test_bond_cleavage_with_protonation() {
        let graph = MolecularGraph::parse("CCO").unwrap();
        let adduct = Adduct::parse("[M+H]+").unwrap();
        let precursor = adduct.ion_formula(&graph.formula()).unwrap();
        let settings = GeneratorSettings { depth: 1, hydrogen_shift: 0, strict_valence: false };
        let set = generate_candidates(&precursor, Some(&graph), &adduct, &settings);

        // C-O cleavage: ethyl + H and hydroxyl + H (water)
        assert!(set.get(&formula("C2H6")).is_some());
        assert!(set.get(&formula("H2O")).is_some());
        // the bare proton is the boundary sentinel
        assert_eq!(set.get(&formula("H")).unwrap().provenance, Provenance::Empty);
    }

    #[test]
    fn test_oversized_settings_are_clamped() {
        let precursor = formula("C9H11NO2");
        let settings = GeneratorSettings { depth: usize::MAX, hydrogen_shift: u32::MAX, strict_valence: false };
        let set = generate_candidates(&precursor, None, &Adduct::from_charge(1), &settings);
        assert!(!set.is_exhausted());
        assert!(set.candidates().iter().all(|c| c.depth <= MAX_CANDIDATE_DEPTH));

        // the shift stays positive instead of wrapping around
        let graph = MolecularGraph::parse("CCO").unwrap();
        let adduct = Adduct::parse("[M+H]+").unwrap();
        let precursor = adduct.ion_formula(&graph.formula()).unwrap();
        let set = generate_candidates(&precursor, Some(&graph), &adduct, &settings);
        let shifted = set.get(&formula("C2H7")).unwrap();
        assert!(matches!(shifted.provenance, Provenance::BondCleavage { hydrogen_shift: 1, .. }));
    }

    #[test]
    fn test_within_is_inclusive() {
        let set = generate_candidates(&formula("H2O"), None, &Adduct::from_charge(1), &GeneratorSettings::default());
        let water = set.get(&formula("H2O")).unwrap().mass;
        assert_eq!(set.within(water + 0.01, 0.01).len(), 1);
        assert_eq!(set.within(water + 0.010001, 0.01).len(), 0);
        assert_eq!(set.within(water - 0.01, 0.01).len(), 1);
    }

    #[test]
    fn test_provenance_display() {
        let p = Provenance::NeutralLoss { losses: vec!["water".into(), "carbon monoxide".into()] };
        assert_eq!(p.to_string(), "loss of water + carbon monoxide");
        let p = Provenance::BondCleavage { bonds: vec![3], hydrogen_shift: -1 };
        assert_eq!(p.to_string(), "cleavage of bonds [3] with -1 H");
    }
}
