use std::collections::{BTreeMap, HashSet};

use crate::chemistry::elements::{is_known_element, organic_subset_valences};
use crate::chemistry::sum_formula::SumFormula;
use crate::error::SmilesParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Quadruple,
    Aromatic,
}

impl BondOrder {
    // aromatic bonds count as one, the extra electron is added per atom
    fn valence_contribution(&self) -> u32 {
        match self {
            BondOrder::Single | BondOrder::Aromatic => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Quadruple => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    pub element: String,
    pub aromatic: bool,
    /// implicit hydrogens for organic-subset atoms, explicit ones for bracket atoms
    pub hydrogens: u32,
    pub charge: i32,
    pub bracket: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bond {
    pub begin: usize,
    pub end: usize,
    pub order: BondOrder,
    pub in_ring: bool,
}

impl Bond {
    /// Acyclic single bonds and every ring bond can be broken during fragmentation.
    pub fn is_cleavable(&self) -> bool {
        self.in_ring || self.order == BondOrder::Single
    }
}

/// Heavy-atom connectivity of a molecule parsed from SMILES, hydrogens folded into their atoms.
#[derive(Clone, Debug, PartialEq)]
pub struct MolecularGraph {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
}

impl MolecularGraph {
    /// Parse a SMILES string.
    ///
    /// Supports the organic subset, bracket atoms (isotope, chirality, hydrogen count,
    /// charge and atom class; isotope and chirality are ignored), branches, ring
    /// closures including `%nn`, explicit bond symbols and disconnected components.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::data::smiles::MolecularGraph;
    ///
    /// let phe = MolecularGraph::parse("N[C@@H](Cc1ccccc1)C(=O)O").unwrap();
    /// assert_eq!(phe.formula().to_string(), "C9H11NO2");
    /// assert_eq!(phe.atoms().len(), 12);
    /// ```
    pub fn parse(smiles: &str) -> Result<Self, SmilesParseError> {
        let mut parser = Parser::new(smiles);
        parser.run()?;
        let mut graph = MolecularGraph {
            atoms: parser.atoms,
            bonds: parser.bonds,
        };
        graph.assign_implicit_hydrogens()?;
        graph.mark_ring_bonds();
        Ok(graph)
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    /// Indices of the bonds that fragmentation may break.
    pub fn cleavable_bonds(&self) -> Vec<usize> {
        self.bonds
            .iter()
            .enumerate()
            .filter(|(_, bond)| bond.is_cleavable())
            .map(|(index, _)| index)
            .collect()
    }

    /// Elemental formula of the whole molecule.
    pub fn formula(&self) -> SumFormula {
        self.formula_of((0..self.atoms.len()).collect::<Vec<_>>().as_slice())
    }

    /// Elemental formula of a subset of atoms, including their hydrogens.
    pub fn formula_of(&self, atoms: &[usize]) -> SumFormula {
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for &index in atoms {
            let atom = &self.atoms[index];
            *counts.entry(atom.element.as_str()).or_insert(0) += 1;
            if atom.hydrogens > 0 {
                *counts.entry("H").or_insert(0) += atom.hydrogens;
            }
        }
        SumFormula::from_counts(counts)
    }

    /// Connected components (as sorted atom index lists) once `removed` bonds are broken.
    ///
    /// Components are ordered by their lowest atom index.
    pub fn components_without(&self, removed: &[usize]) -> Vec<Vec<usize>> {
        let mut parent: Vec<usize> = (0..self.atoms.len()).collect();
        for (index, bond) in self.bonds.iter().enumerate() {
            if !removed.contains(&index) {
                union(&mut parent, bond.begin, bond.end);
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for atom in 0..self.atoms.len() {
            let root = find(&mut parent, atom);
            groups.entry(root).or_default().push(atom);
        }
        let mut components: Vec<Vec<usize>> = groups.into_values().collect();
        components.sort_by_key(|c| c[0]);
        components
    }

    fn assign_implicit_hydrogens(&mut self) -> Result<(), SmilesParseError> {
        let mut bond_sums = vec![0u32; self.atoms.len()];
        for bond in &self.bonds {
            bond_sums[bond.begin] += bond.order.valence_contribution();
            bond_sums[bond.end] += bond.order.valence_contribution();
        }

        for (index, atom) in self.atoms.iter_mut().enumerate() {
            if atom.bracket {
                continue;
            }
            let valences = organic_subset_valences(&atom.element).ok_or_else(|| {
                SmilesParseError::UnknownAtom {
                    symbol: atom.element.clone(),
                    position: index,
                }
            })?;
            if atom.aromatic {
                let used = bond_sums[index] + 1;
                atom.hydrogens = valences[0].saturating_sub(used);
                continue;
            }
            let used = bond_sums[index];
            let valence = valences.iter().find(|&&v| v >= used).ok_or_else(|| {
                SmilesParseError::ValenceExceeded {
                    symbol: atom.element.clone(),
                    index,
                }
            })?;
            atom.hydrogens = valence - used;
        }
        Ok(())
    }

    // a bond is in a ring when its ends stay connected without it
    fn mark_ring_bonds(&mut self) {
        let n = self.atoms.len();
        let ring_flags: Vec<bool> = (0..self.bonds.len())
            .map(|skip| {
                let mut parent: Vec<usize> = (0..n).collect();
                for (index, bond) in self.bonds.iter().enumerate() {
                    if index != skip {
                        union(&mut parent, bond.begin, bond.end);
                    }
                }
                let bond = &self.bonds[skip];
                find(&mut parent, bond.begin) == find(&mut parent, bond.end)
            })
            .collect();
        for (bond, in_ring) in self.bonds.iter_mut().zip(ring_flags) {
            bond.in_ring = in_ring;
        }
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    bonded: HashSet<(usize, usize)>,
    previous: Option<usize>,
    pending_bond: Option<(BondOrder, usize)>,
    branches: Vec<(Option<usize>, usize)>,
    // ring label -> (opening atom, bond order written at the opening, position)
    open_rings: BTreeMap<u32, (usize, Option<BondOrder>, usize)>,
}

impl Parser {
    fn new(smiles: &str) -> Self {
        Parser {
            chars: smiles.trim().chars().collect(),
            pos: 0,
            atoms: Vec::new(),
            bonds: Vec::new(),
            bonded: HashSet::new(),
            previous: None,
            pending_bond: None,
            branches: Vec::new(),
            open_rings: BTreeMap::new(),
        }
    }

    fn unexpected(&self, position: usize) -> SmilesParseError {
        SmilesParseError::UnexpectedCharacter {
            character: self.chars[position],
            position,
        }
    }

    fn run(&mut self) -> Result<(), SmilesParseError> {
        if self.chars.is_empty() {
            return Err(SmilesParseError::Empty);
        }

        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match c {
                '[' => {
                    let atom = self.bracket_atom()?;
                    self.push_atom(atom);
                }
                'B' | 'C' | 'N' | 'O' | 'P' | 'S' | 'F' | 'I' | 'b' | 'c' | 'n' | 'o' | 'p' | 's' => {
                    let atom = self.organic_atom();
                    self.push_atom(atom);
                }
                '(' => {
                    if self.previous.is_none() || self.pending_bond.is_some() {
                        return Err(self.unexpected(self.pos));
                    }
                    self.branches.push((self.previous, self.pos));
                    self.pos += 1;
                }
                ')' => {
                    if let Some((_, position)) = self.pending_bond {
                        return Err(SmilesParseError::DanglingBond(position));
                    }
                    let (previous, _) = self
                        .branches
                        .pop()
                        .ok_or(SmilesParseError::UnmatchedBranchClose(self.pos))?;
                    self.previous = previous;
                    self.pos += 1;
                }
                '-' | '=' | '#' | '$' | ':' | '/' | '\\' => {
                    if self.pending_bond.is_some() || self.previous.is_none() {
                        return Err(self.unexpected(self.pos));
                    }
                    let order = match c {
                        '=' => BondOrder::Double,
                        '#' => BondOrder::Triple,
                        '$' => BondOrder::Quadruple,
                        ':' => BondOrder::Aromatic,
                        _ => BondOrder::Single,
                    };
                    self.pending_bond = Some((order, self.pos));
                    self.pos += 1;
                }
                '.' => {
                    if let Some((_, position)) = self.pending_bond {
                        return Err(SmilesParseError::DanglingBond(position));
                    }
                    self.previous = None;
                    self.pos += 1;
                }
                '0'..='9' | '%' => self.ring_closure()?,
                _ => return Err(self.unexpected(self.pos)),
            }
        }

        if let Some((_, position)) = self.pending_bond {
            return Err(SmilesParseError::DanglingBond(position));
        }
        if let Some(&(_, position)) = self.branches.last() {
            return Err(SmilesParseError::UnclosedBranch(position));
        }
        if let Some((&label, _)) = self.open_rings.iter().next() {
            return Err(SmilesParseError::UnclosedRing(label));
        }
        if self.atoms.is_empty() {
            return Err(SmilesParseError::Empty);
        }
        Ok(())
    }

    fn organic_atom(&mut self) -> Atom {
        let c = self.chars[self.pos];
        let next = self.chars.get(self.pos + 1).copied();
        let (element, width) = match (c, next) {
            ('C', Some('l')) => ("Cl".to_string(), 2),
            ('B', Some('r')) => ("Br".to_string(), 2),
            _ => (c.to_ascii_uppercase().to_string(), 1),
        };
        self.pos += width;
        Atom {
            element,
            aromatic: c.is_ascii_lowercase(),
            hydrogens: 0,
            charge: 0,
            bracket: false,
        }
    }

    fn bracket_atom(&mut self) -> Result<Atom, SmilesParseError> {
        let open = self.pos;
        let close = (open..self.chars.len())
            .find(|&i| self.chars[i] == ']')
            .ok_or(SmilesParseError::UnclosedBracket(open))?;
        let mut i = open + 1;

        // isotope
        while i < close && self.chars[i].is_ascii_digit() {
            i += 1;
        }

        let symbol_start = i;
        let first = *self.chars.get(i).filter(|_| i < close).ok_or_else(|| self.unexpected(close))?;
        let second = self.chars.get(i + 1).copied().filter(|c| c.is_ascii_lowercase() && i + 1 < close);
        let (element, aromatic) = if first.is_ascii_uppercase() {
            match second.map(|s| format!("{}{}", first, s)) {
                Some(two) if is_known_element(&two) => {
                    i += 2;
                    (two, false)
                }
                _ => {
                    i += 1;
                    (first.to_string(), false)
                }
            }
        } else if first.is_ascii_lowercase() {
            match second.map(|s| format!("{}{}", first, s)) {
                Some(two) if two == "se" || two == "as" => {
                    i += 2;
                    (capitalize(&two), true)
                }
                _ if "bcnops".contains(first) => {
                    i += 1;
                    (first.to_ascii_uppercase().to_string(), true)
                }
                _ => return Err(self.unexpected(i)),
            }
        } else {
            return Err(self.unexpected(i));
        };
        if !is_known_element(&element) {
            return Err(SmilesParseError::UnknownAtom {
                symbol: element,
                position: symbol_start,
            });
        }

        // chirality
        while i < close && self.chars[i] == '@' {
            i += 1;
        }

        let mut hydrogens = 0;
        if i < close && self.chars[i] == 'H' {
            i += 1;
            hydrogens = 1;
            // hydrogen count is a single digit
            if i < close && self.chars[i].is_ascii_digit() {
                hydrogens = self.number(i, i + 1)?;
                i += 1;
            }
        }

        let mut charge = 0i32;
        if i < close && (self.chars[i] == '+' || self.chars[i] == '-') {
            let sign = if self.chars[i] == '+' { 1 } else { -1 };
            let symbol = self.chars[i];
            i += 1;
            // at most two charge digits
            let start = i;
            while i < close && i - start < 2 && self.chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut magnitude = 1;
            if i > start {
                magnitude = self.number(start, i)? as i32;
            } else {
                while i < close && self.chars[i] == symbol {
                    magnitude += 1;
                    i += 1;
                }
            }
            charge = sign * magnitude;
        }

        // atom class
        if i < close && self.chars[i] == ':' {
            i += 1;
            while i < close && self.chars[i].is_ascii_digit() {
                i += 1;
            }
        }

        if i != close {
            return Err(self.unexpected(i));
        }
        self.pos = close + 1;
        Ok(Atom {
            element,
            aromatic,
            hydrogens,
            charge,
            bracket: true,
        })
    }

    fn number(&self, start: usize, end: usize) -> Result<u32, SmilesParseError> {
        let text: String = self.chars[start..end].iter().collect();
        text.parse::<u32>().map_err(|_| self.unexpected(start))
    }

    fn push_atom(&mut self, atom: Atom) {
        let index = self.atoms.len();
        let aromatic = atom.aromatic;
        self.atoms.push(atom);
        if let Some(previous) = self.previous {
            let order = match self.pending_bond.take() {
                Some((order, _)) => order,
                None => self.default_order(previous, index, aromatic),
            };
            self.add_bond(previous, index, order);
        }
        self.previous = Some(index);
    }

    fn default_order(&self, a: usize, _b: usize, b_aromatic: bool) -> BondOrder {
        if self.atoms[a].aromatic && b_aromatic {
            BondOrder::Aromatic
        } else {
            BondOrder::Single
        }
    }

    fn add_bond(&mut self, begin: usize, end: usize, order: BondOrder) -> bool {
        let key = (begin.min(end), begin.max(end));
        if begin == end || !self.bonded.insert(key) {
            return false;
        }
        self.bonds.push(Bond {
            begin,
            end,
            order,
            in_ring: false,
        });
        true
    }

    fn ring_closure(&mut self) -> Result<(), SmilesParseError> {
        let start = self.pos;
        let label = if self.chars[self.pos] == '%' {
            let digits = (self.pos + 1..self.pos + 3)
                .all(|i| self.chars.get(i).is_some_and(|c| c.is_ascii_digit()));
            if !digits {
                return Err(self.unexpected(self.pos));
            }
            self.pos += 3;
            self.number(start + 1, start + 3)?
        } else {
            self.pos += 1;
            self.number(start, start + 1)?
        };

        let current = self.previous.ok_or_else(|| self.unexpected(start))?;
        let written = self.pending_bond.take().map(|(order, _)| order);

        match self.open_rings.remove(&label) {
            Some((opener, opened_with, _)) => {
                let order = match (written, opened_with) {
                    (Some(order), _) | (None, Some(order)) => order,
                    (None, None) => self.default_order(opener, current, self.atoms[current].aromatic),
                };
                if !self.add_bond(opener, current, order) {
                    return Err(SmilesParseError::InvalidRingBond { label, position: start });
                }
            }
            None => {
                self.open_rings.insert(label, (current, written, start));
            }
        }
        Ok(())
    }
}

fn capitalize(symbol: &str) -> String {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
