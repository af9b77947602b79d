use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chemistry::elements::{is_known_element, monoisotopic_mass, rdbe_valence};
use crate::error::{CountOverflow, FormulaParseError, UnreachableFormula};

/// An elemental formula: a mapping from element symbol to a non-negative atom count.
///
/// Zero counts are never stored, so two formulas describing the same composition
/// compare equal and hash identically. Values are immutable; every arithmetic
/// operation returns a new formula.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SumFormula {
    elements: BTreeMap<String, u32>,
}

impl SumFormula {
    /// Parse a formula such as `C9H11NO2` or `C6H5(CH2)2OH`.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::chemistry::sum_formula::SumFormula;
    ///
    /// let water = SumFormula::parse("H2O").unwrap();
    /// assert_eq!(water.count("H"), 2);
    /// assert_eq!(water.count("O"), 1);
    /// assert!(SumFormula::parse("H2Xx").is_err());
    /// ```
    pub fn parse(formula: &str) -> Result<Self, FormulaParseError> {
        let elements = parse_formula(formula)?;
        if elements.is_empty() {
            return Err(FormulaParseError::Empty);
        }
        Ok(SumFormula { elements })
    }

    /// The formula with no atoms.
    pub fn empty() -> Self {
        SumFormula::default()
    }

    /// Build a formula from element counts. Symbols must be known elements.
    pub(crate) fn from_counts<I, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut elements = BTreeMap::new();
        for (symbol, count) in counts {
            if count > 0 {
                *elements.entry(symbol.into()).or_insert(0) += count;
            }
        }
        SumFormula { elements }
    }

    pub fn elements(&self) -> &BTreeMap<String, u32> {
        &self.elements
    }

    pub fn count(&self, element: &str) -> u32 {
        self.elements.get(element).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn atom_count(&self) -> u64 {
        self.elements.values().map(|&count| count as u64).sum()
    }

    /// Calculate the monoisotopic mass of the formula.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::chemistry::sum_formula::SumFormula;
    ///
    /// let water = SumFormula::parse("H2O").unwrap();
    /// assert!((water.mass() - 18.0105646837).abs() < 1e-9);
    /// ```
    pub fn mass(&self) -> f64 {
        self.elements.iter().fold(0.0, |acc, (element, count)| {
            acc + monoisotopic_mass(element).unwrap_or(0.0) * *count as f64
        })
    }

    /// Combine the atoms of two formulas.
    ///
    /// Fails when a combined count no longer fits an atom count.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::chemistry::sum_formula::SumFormula;
    ///
    /// let methyl = SumFormula::parse("CH3").unwrap();
    /// let hydroxyl = SumFormula::parse("OH").unwrap();
    /// assert_eq!(methyl.add(&hydroxyl).unwrap().to_string(), "CH4O");
    /// ```
    pub fn add(&self, other: &SumFormula) -> Result<SumFormula, CountOverflow> {
        let mut elements = self.elements.clone();
        for (element, &count) in &other.elements {
            let entry = elements.entry(element.clone()).or_insert(0);
            *entry = entry.checked_add(count).ok_or_else(|| CountOverflow {
                element: element.clone(),
            })?;
        }
        Ok(SumFormula { elements })
    }

    /// Remove the atoms of `other` from this formula.
    ///
    /// Fails when any element of `other` is more abundant than in `self`; that failure
    /// marks the result as unreachable rather than signalling a processing error.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::chemistry::sum_formula::SumFormula;
    ///
    /// let phe = SumFormula::parse("C9H11NO2").unwrap();
    /// let water = SumFormula::parse("H2O").unwrap();
    /// assert_eq!(phe.subtract(&water).unwrap().to_string(), "C9H9NO");
    /// assert!(water.subtract(&phe).is_err());
    /// ```
    pub fn subtract(&self, other: &SumFormula) -> Result<SumFormula, UnreachableFormula> {
        let mut elements = self.elements.clone();
        for (element, &required) in &other.elements {
            let available = self.count(element);
            if required > available {
                return Err(UnreachableFormula {
                    element: element.clone(),
                    available,
                    required,
                });
            }
            if required == available {
                elements.remove(element);
            } else {
                elements.insert(element.clone(), available - required);
            }
        }
        Ok(SumFormula { elements })
    }

    pub fn scale(&self, factor: u32) -> Result<SumFormula, CountOverflow> {
        if factor == 0 {
            return Ok(SumFormula::empty());
        }
        let mut elements = BTreeMap::new();
        for (element, &count) in &self.elements {
            let scaled = count.checked_mul(factor).ok_or_else(|| CountOverflow {
                element: element.clone(),
            })?;
            elements.insert(element.clone(), scaled);
        }
        Ok(SumFormula { elements })
    }

    pub fn is_subformula_of(&self, other: &SumFormula) -> bool {
        self.elements.iter().all(|(element, &count)| other.count(element) >= count)
    }

    /// Ring-plus-double-bond equivalents, `None` if an element has no standard valence.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::chemistry::sum_formula::SumFormula;
    ///
    /// let benzene = SumFormula::parse("C6H6").unwrap();
    /// assert_eq!(benzene.rdbe(), Some(4.0));
    /// ```
    pub fn rdbe(&self) -> Option<f64> {
        let mut sum = 0.0;
        for (element, &count) in &self.elements {
            let valence = rdbe_valence(element)? as f64;
            sum += count as f64 * (valence - 2.0);
        }
        Some(1.0 + sum / 2.0)
    }

    /// Whether this formula can be lost as a neutral (or radical) fragment.
    ///
    /// An empty loss is never valid. Under strict valence rules the loss must also
    /// have a non-negative ring-plus-double-bond equivalent; elements without a
    /// standard valence are accepted.
    pub fn is_valid_loss(&self, strict_valence: bool) -> bool {
        if self.is_empty() {
            return false;
        }
        if !strict_valence {
            return true;
        }
        self.rdbe().map_or(true, |rdbe| rdbe >= 0.0)
    }
}

/// Hill notation: carbon first, then hydrogen, then the rest alphabetically.
/// Without carbon every element is alphabetical.
impl Display for SumFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let write_element = |f: &mut Formatter<'_>, element: &str, count: u32| {
            if count == 1 {
                write!(f, "{}", element)
            } else {
                write!(f, "{}{}", element, count)
            }
        };

        let has_carbon = self.elements.contains_key("C");
        if has_carbon {
            write_element(f, "C", self.count("C"))?;
            if let Some(&h) = self.elements.get("H") {
                write_element(f, "H", h)?;
            }
        }
        for (element, &count) in &self.elements {
            if has_carbon && (element == "C" || element == "H") {
                continue;
            }
            write_element(f, element, count)?;
        }
        Ok(())
    }
}

impl FromStr for SumFormula {
    type Err = FormulaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SumFormula::parse(s)
    }
}

impl TryFrom<String> for SumFormula {
    type Error = FormulaParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(SumFormula::empty());
        }
        SumFormula::parse(&value)
    }
}

impl From<SumFormula> for String {
    fn from(value: SumFormula) -> Self {
        value.to_string()
    }
}

/// Parse a chemical formula into a map of elements and their counts.
///
/// Supports element symbols with optional counts and parenthesised groups with
/// an optional multiplier. Explicit zero counts are accepted and dropped.
///
/// # Example
///
/// ```
/// use msdenoise::chemistry::sum_formula::parse_formula;
///
/// let elements = parse_formula("C6H5(CH2)2OH").unwrap();
/// assert_eq!(elements.get("C"), Some(&8));
/// assert_eq!(elements.get("H"), Some(&10));
/// assert_eq!(elements.get("O"), Some(&1));
/// ```
pub fn parse_formula(formula: &str) -> Result<BTreeMap<String, u32>, FormulaParseError> {
    let chars: Vec<char> = formula.trim().chars().collect();
    if chars.is_empty() {
        return Err(FormulaParseError::Empty);
    }

    // one frame per open parenthesis, with the position it was opened at
    let mut stack: Vec<(BTreeMap<String, u32>, usize)> = vec![(BTreeMap::new(), 0)];
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_uppercase() {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_lowercase() {
                i += 1;
            }
            let symbol: String = chars[start..i].iter().collect();
            if !is_known_element(&symbol) {
                return Err(FormulaParseError::UnknownElement(symbol));
            }
            let count = read_count(&chars, &mut i)?;
            let top = stack.len() - 1;
            let frame = &mut stack[top].0;
            let entry = frame.entry(symbol).or_insert(0);
            *entry = entry.checked_add(count).ok_or_else(|| FormulaParseError::InvalidCount {
                count: count.to_string(),
                position: start,
            })?;
        } else if c == '(' {
            stack.push((BTreeMap::new(), i));
            i += 1;
        } else if c == ')' {
            if stack.len() < 2 {
                return Err(FormulaParseError::UnbalancedParenthesis(i));
            }
            let close = i;
            let (group, _) = stack.pop().ok_or(FormulaParseError::UnbalancedParenthesis(close))?;
            i += 1;
            let multiplier = read_count(&chars, &mut i)?;
            let top = stack.len() - 1;
            let frame = &mut stack[top].0;
            let overflow = || FormulaParseError::InvalidCount {
                count: multiplier.to_string(),
                position: close + 1,
            };
            for (element, count) in group {
                let scaled = count.checked_mul(multiplier).ok_or_else(overflow)?;
                let entry = frame.entry(element).or_insert(0);
                *entry = entry.checked_add(scaled).ok_or_else(overflow)?;
            }
        } else if c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            return Err(FormulaParseError::InvalidCount {
                count: chars[start..i].iter().collect(),
                position: start,
            });
        } else {
            return Err(FormulaParseError::UnexpectedCharacter { character: c, position: i });
        }
    }

    if stack.len() != 1 {
        let (_, opened_at) = &stack[stack.len() - 1];
        return Err(FormulaParseError::UnbalancedParenthesis(*opened_at));
    }

    let (mut elements, _) = stack.remove(0);
    elements.retain(|_, count| *count > 0);
    Ok(elements)
}

// reads an optional integer count, defaulting to 1
fn read_count(chars: &[char], i: &mut usize) -> Result<u32, FormulaParseError> {
    let start = *i;
    while *i < chars.len() && chars[*i].is_ascii_digit() {
        *i += 1;
    }
    if *i == start {
        return Ok(1);
    }

    // fractional counts are rejected as a whole token
    if *i < chars.len() && chars[*i] == '.' {
        *i += 1;
        while *i < chars.len() && chars[*i].is_ascii_digit() {
            *i += 1;
        }
        return Err(FormulaParseError::InvalidCount {
            count: chars[start..*i].iter().collect(),
            position: start,
        });
    }

    let text: String = chars[start..*i].iter().collect();
    text.parse::<u32>().map_err(|_| FormulaParseError::InvalidCount { count: text.clone(), position: start })
}
