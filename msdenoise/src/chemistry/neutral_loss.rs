use std::sync::LazyLock;

use crate::chemistry::sum_formula::SumFormula;

/// A small molecule or radical commonly expelled from a precursor during fragmentation.
#[derive(Clone, Debug, PartialEq)]
pub struct NeutralLoss {
    pub name: &'static str,
    pub formula: SumFormula,
}

impl NeutralLoss {
    fn new(name: &'static str, counts: &[(&'static str, u32)]) -> Self {
        NeutralLoss {
            name,
            formula: SumFormula::from_counts(counts.iter().copied()),
        }
    }

    pub fn mass(&self) -> f64 {
        self.formula.mass()
    }
}

static CATALOG: LazyLock<Vec<NeutralLoss>> = LazyLock::new(|| {
    vec![
        // radicals
        NeutralLoss::new("hydrogen radical", &[("H", 1)]),
        NeutralLoss::new("methyl radical", &[("C", 1), ("H", 3)]),
        NeutralLoss::new("hydroxyl radical", &[("H", 1), ("O", 1)]),
        // small neutrals
        NeutralLoss::new("hydrogen", &[("H", 2)]),
        NeutralLoss::new("methane", &[("C", 1), ("H", 4)]),
        NeutralLoss::new("ammonia", &[("H", 3), ("N", 1)]),
        NeutralLoss::new("water", &[("H", 2), ("O", 1)]),
        NeutralLoss::new("hydrogen cyanide", &[("C", 1), ("H", 1), ("N", 1)]),
        NeutralLoss::new("carbon monoxide", &[("C", 1), ("O", 1)]),
        NeutralLoss::new("ethylene", &[("C", 2), ("H", 4)]),
        NeutralLoss::new("formaldehyde", &[("C", 1), ("H", 2), ("O", 1)]),
        NeutralLoss::new("methanol", &[("C", 1), ("H", 4), ("O", 1)]),
        NeutralLoss::new("hydrogen sulfide", &[("H", 2), ("S", 1)]),
        NeutralLoss::new("ketene", &[("C", 2), ("H", 2), ("O", 1)]),
        NeutralLoss::new("propene", &[("C", 3), ("H", 6)]),
        NeutralLoss::new("carbon dioxide", &[("C", 1), ("O", 2)]),
        NeutralLoss::new("formic acid", &[("C", 1), ("H", 2), ("O", 2)]),
        NeutralLoss::new("butene", &[("C", 4), ("H", 8)]),
        NeutralLoss::new("acetic acid", &[("C", 2), ("H", 4), ("O", 2)]),
        // heteroatom losses
        NeutralLoss::new("hydrogen fluoride", &[("H", 1), ("F", 1)]),
        NeutralLoss::new("hydrogen chloride", &[("H", 1), ("Cl", 1)]),
        NeutralLoss::new("hydrogen bromide", &[("H", 1), ("Br", 1)]),
        NeutralLoss::new("hydrogen iodide", &[("H", 1), ("I", 1)]),
        NeutralLoss::new("sulfur dioxide", &[("O", 2), ("S", 1)]),
        NeutralLoss::new("sulfur trioxide", &[("O", 3), ("S", 1)]),
        NeutralLoss::new("metaphosphoric acid", &[("H", 1), ("O", 3), ("P", 1)]),
        NeutralLoss::new("phosphoric acid", &[("H", 3), ("O", 4), ("P", 1)]),
        // glycosides
        NeutralLoss::new("pentose", &[("C", 5), ("H", 8), ("O", 4)]),
        NeutralLoss::new("deoxyhexose", &[("C", 6), ("H", 10), ("O", 4)]),
        NeutralLoss::new("hexose", &[("C", 6), ("H", 10), ("O", 5)]),
        NeutralLoss::new("glucuronic acid", &[("C", 6), ("H", 8), ("O", 6)]),
    ]
});

/// The process-wide catalog of common neutral losses, ordered from the smallest
/// to the most specific chemistry. Read-only for the lifetime of the program.
pub fn neutral_loss_catalog() -> &'static [NeutralLoss] {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_well_formed() {
        let catalog = neutral_loss_catalog();
        assert!(catalog.len() > 20);
        for loss in catalog {
            assert!(!loss.formula.is_empty(), "{} has no atoms", loss.name);
            assert!(loss.mass() > 1.0);
        }
        let mut formulas: Vec<_> = catalog.iter().map(|l| l.formula.clone()).collect();
        formulas.sort();
        formulas.dedup();
        assert_eq!(formulas.len(), catalog.len());
    }

    #[test]
    fn test_water_mass() {
        let water = neutral_loss_catalog().iter().find(|l| l.name == "water").unwrap();
        assert!((water.mass() - 18.0105646863).abs() < 1e-6);
    }
}
