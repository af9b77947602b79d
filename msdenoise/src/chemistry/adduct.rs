use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chemistry::sum_formula::SumFormula;
use crate::error::{AdductParseError, CountOverflow, FormulaArithmeticError};

static ADDUCT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[?(?P<multimer>\d*)M(?P<terms>(?:[+-]\d*[A-Za-z][A-Za-z0-9]*)*)\]?(?P<charge>\d*)(?P<sign>[+-]+)$")
        .expect("adduct pattern is a valid regex")
});

static TERM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<sign>[+-])(?P<count>\d*)(?P<formula>[A-Za-z][A-Za-z0-9]*)")
        .expect("adduct term pattern is a valid regex")
});

// solvent abbreviations used in library adduct columns
fn alias_formula(term: &str) -> Option<SumFormula> {
    let counts: &[(&str, u32)] = match term {
        "FA" => &[("C", 1), ("H", 2), ("O", 2)],
        "ACN" => &[("C", 2), ("H", 3), ("N", 1)],
        "HAc" | "Hac" => &[("C", 2), ("H", 4), ("O", 2)],
        "MeOH" => &[("C", 1), ("H", 4), ("O", 1)],
        "TFA" => &[("C", 2), ("H", 1), ("F", 3), ("O", 2)],
        "DMSO" => &[("C", 2), ("H", 6), ("O", 1), ("S", 1)],
        _ => return None,
    };
    Some(SumFormula::from_counts(counts.iter().copied()))
}

/// Precursor ion type, e.g. `[M+H]+`, `[M-H]-`, `[2M+Na]+` or `[M+H-H2O]+`.
///
/// The ion formula is `multimer * M + added - removed`, carrying `charge`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Adduct {
    pub notation: String,
    pub multimer: u32,
    pub added: SumFormula,
    pub removed: SumFormula,
    /// hydrogens removed by `-H` style terms, as opposed to in-source losses such as `-H2O`
    pub deprotonations: u32,
    pub charge: i32,
}

impl Adduct {
    /// Parse adduct notation.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::chemistry::adduct::Adduct;
    ///
    /// let adduct = Adduct::parse("[M+2H]2+").unwrap();
    /// assert_eq!(adduct.charge, 2);
    /// assert_eq!(adduct.added.count("H"), 2);
    ///
    /// let adduct = Adduct::parse("[M-H]-").unwrap();
    /// assert_eq!(adduct.charge, -1);
    /// assert_eq!(adduct.removed.count("H"), 1);
    /// ```
    pub fn parse(text: &str) -> Result<Self, AdductParseError> {
        let notation = text.trim();
        let malformed = || AdductParseError::Malformed(notation.to_string());
        let captures = ADDUCT_PATTERN.captures(notation).ok_or_else(malformed)?;

        let multimer = match &captures["multimer"] {
            "" => 1,
            digits => digits.parse::<u32>().map_err(|_| malformed())?,
        };
        if multimer == 0 {
            return Err(malformed());
        }

        let signs = &captures["sign"];
        let polarity = if signs.chars().all(|c| c == '+') {
            1
        } else if signs.chars().all(|c| c == '-') {
            -1
        } else {
            return Err(malformed());
        };
        let magnitude = match &captures["charge"] {
            "" => signs.len() as i32,
            _ if signs.len() > 1 => return Err(malformed()),
            digits => digits.parse::<i32>().map_err(|_| malformed())?,
        };
        if magnitude == 0 {
            return Err(malformed());
        }

        let mut added = SumFormula::empty();
        let mut removed = SumFormula::empty();
        let mut deprotonations = 0;
        for term in TERM_PATTERN.captures_iter(&captures["terms"]) {
            let count = match &term["count"] {
                "" => 1,
                digits => digits.parse::<u32>().map_err(|_| malformed())?,
            };
            let text = &term["formula"];
            let formula = match alias_formula(text) {
                Some(formula) => formula,
                None => SumFormula::parse(text).map_err(|source| AdductParseError::Term {
                    term: text.to_string(),
                    source,
                })?,
            };
            let overflow = |source: CountOverflow| AdductParseError::Overflow {
                notation: notation.to_string(),
                source,
            };
            let formula = formula.scale(count).map_err(overflow)?;
            match &term["sign"] {
                "+" => added = added.add(&formula).map_err(overflow)?,
                _ => {
                    if formula.elements().keys().all(|element| element == "H") {
                        deprotonations = formula.count("H").checked_add(deprotonations).ok_or_else(|| {
                            overflow(CountOverflow { element: "H".to_string() })
                        })?;
                    }
                    removed = removed.add(&formula).map_err(overflow)?;
                }
            }
        }

        Ok(Adduct {
            notation: notation.to_string(),
            multimer,
            added,
            removed,
            deprotonations,
            charge: polarity * magnitude,
        })
    }

    /// The bare charged molecule, `[M]+` or `[M]-` style, used when a record has no adduct.
    pub fn from_charge(charge: i32) -> Self {
        let sign = if charge < 0 { "-" } else { "+" };
        let notation = match charge.unsigned_abs() {
            1 => format!("[M]{}", sign),
            n => format!("[M]{}{}", n, sign),
        };
        Adduct {
            notation,
            multimer: 1,
            added: SumFormula::empty(),
            removed: SumFormula::empty(),
            deprotonations: 0,
            charge,
        }
    }

    /// Apply the adduct to a neutral molecule formula.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::chemistry::adduct::Adduct;
    /// use msdenoise::chemistry::sum_formula::SumFormula;
    ///
    /// let molecule = SumFormula::parse("C9H11NO2").unwrap();
    /// let ion = Adduct::parse("[M+H-H2O]+").unwrap().ion_formula(&molecule).unwrap();
    /// assert_eq!(ion.to_string(), "C9H10NO");
    /// ```
    pub fn ion_formula(&self, molecule: &SumFormula) -> Result<SumFormula, FormulaArithmeticError> {
        let ion = molecule.scale(self.multimer)?.add(&self.added)?;
        Ok(ion.subtract(&self.removed)?)
    }

    /// Atoms that carry the charge onto every fragment, as `(added, removed)`.
    ///
    /// Everything added counts, of the removed terms only deprotonations do. Other
    /// removed groups are in-source losses of the precursor alone.
    pub fn charge_carrier(&self) -> (SumFormula, SumFormula) {
        let removed_hydrogens = SumFormula::from_counts([("H", self.deprotonations)]);
        (self.added.clone(), removed_hydrogens)
    }
}

impl Display for Adduct {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.notation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_common_adducts() {
        let a = Adduct::parse("[M+H]+").unwrap();
        assert_eq!((a.multimer, a.charge), (1, 1));
        assert_eq!(a.added.to_string(), "H");
        assert!(a.removed.is_empty());

        let a = Adduct::parse("[M+Na]+").unwrap();
        assert_eq!(a.added.to_string(), "Na");

        let a = Adduct::parse("[2M+NH4]+").unwrap();
        assert_eq!(a.multimer, 2);
        assert_eq!(a.added.to_string(), "H4N");

        let a = Adduct::parse("[M+FA-H]-").unwrap();
        assert_eq!(a.charge, -1);
        assert_eq!(a.added.to_string(), "CH2O2");
        assert_eq!(a.removed.to_string(), "H");
        assert_eq!(a.deprotonations, 1);

        let a = Adduct::parse("[M]++").unwrap();
        assert_eq!(a.charge, 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(Adduct::parse("M+H"), Err(AdductParseError::Malformed(_))));
        assert!(matches!(Adduct::parse("[X+H]+"), Err(AdductParseError::Malformed(_))));
        assert!(matches!(Adduct::parse("[0M+H]+"), Err(AdductParseError::Malformed(_))));
        assert!(matches!(Adduct::parse("[M+H]0+"), Err(AdductParseError::Malformed(_))));
        assert!(matches!(Adduct::parse("[M+Qq]+"), Err(AdductParseError::Term { .. })));
    }

    #[test]
    fn test_ion_formula() {
        let m = SumFormula::parse("C9H11NO2").unwrap();
        let ion = Adduct::parse("[M-H]-").unwrap().ion_formula(&m).unwrap();
        assert_eq!(ion.to_string(), "C9H10NO2");
        let dimer = Adduct::parse("[2M+H]+").unwrap().ion_formula(&m).unwrap();
        assert_eq!(dimer.to_string(), "C18H23N2O4");

        let small = SumFormula::parse("CO").unwrap();
        assert!(matches!(
            Adduct::parse("[M-H]-").unwrap().ion_formula(&small),
            Err(FormulaArithmeticError::Unreachable(_))
        ));
    }

    #[test]
    fn test_oversized_counts_are_errors() {
        assert!(matches!(
            Adduct::parse("[M+3000000000H2]+"),
            Err(AdductParseError::Overflow { .. })
        ));
        assert!(matches!(
            Adduct::parse("[M+4000000000H+4000000000H]+"),
            Err(AdductParseError::Overflow { .. })
        ));

        let huge = SumFormula::parse("C4000000000").unwrap();
        let dimer = Adduct::parse("[2M+H]+").unwrap();
        assert_eq!(
            dimer.ion_formula(&huge),
            Err(FormulaArithmeticError::Overflow(CountOverflow { element: "C".to_string() }))
        );
    }

    #[test]
    fn test_charge_carrier() {
        let (added, removed) = Adduct::parse("[M+H-H2O]+").unwrap().charge_carrier();
        assert_eq!(added.to_string(), "H");
        assert!(removed.is_empty());

        let (added, removed) = Adduct::parse("[M-2H]2-").unwrap().charge_carrier();
        assert!(added.is_empty());
        assert_eq!(removed.to_string(), "H2");

        let (added, removed) = Adduct::from_charge(-1).charge_carrier();
        assert!(added.is_empty());
        assert!(removed.is_empty());
        assert_eq!(Adduct::from_charge(-2).to_string(), "[M]2-");
    }
}
