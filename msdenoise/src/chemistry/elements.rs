use std::collections::HashMap;
use std::sync::LazyLock;

/// Monoisotopic masses of the elements that occur in small-molecule spectral libraries.
///
/// Built once on first access and never mutated afterwards, so every worker of a
/// batch reads it without synchronization.
static MONOISOTOPIC_MASSES: LazyLock<HashMap<&'static str, f64>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    map.insert("H", 1.00782503223);
    map.insert("He", 4.00260325415);
    map.insert("Li", 7.0160034366);
    map.insert("Be", 9.012183065);
    map.insert("B", 11.00930536);
    map.insert("C", 12.0000000);
    map.insert("N", 14.00307400443);
    map.insert("O", 15.99491461957);
    map.insert("F", 18.99840316273);
    map.insert("Ne", 19.9924401762);
    map.insert("Na", 22.9897692820);
    map.insert("Mg", 23.985041697);
    map.insert("Al", 26.98153853);
    map.insert("Si", 27.97692653465);
    map.insert("P", 30.97376199842);
    map.insert("S", 31.9720711744);
    map.insert("Cl", 34.968852682);
    map.insert("Ar", 39.9623831237);
    map.insert("K", 38.963706679);
    map.insert("Ca", 39.96259098);
    map.insert("Ti", 47.9479463);
    map.insert("V", 50.9439595);
    map.insert("Cr", 51.9405075);
    map.insert("Mn", 54.9380455);
    map.insert("Fe", 55.9349375);
    map.insert("Co", 58.9331955);
    map.insert("Ni", 57.9353429);
    map.insert("Cu", 62.9295975);
    map.insert("Zn", 63.9291422);
    map.insert("Ga", 68.9255735);
    map.insert("Ge", 73.9211778);
    map.insert("As", 74.9215965);
    map.insert("Se", 79.9165218);
    map.insert("Br", 78.9183376);
    map.insert("Kr", 83.911507);
    map.insert("Rb", 84.9117893);
    map.insert("Sr", 87.9056125);
    map.insert("Mo", 97.905404);
    map.insert("Ru", 101.904349);
    map.insert("Rh", 102.905504);
    map.insert("Pd", 105.903485);
    map.insert("Ag", 106.905093);
    map.insert("Cd", 113.903358);
    map.insert("Sn", 119.902199);
    map.insert("Sb", 120.903818);
    map.insert("Te", 129.906224);
    map.insert("I", 126.904473);
    map.insert("Xe", 131.904155);
    map.insert("Cs", 132.905447);
    map.insert("Ba", 137.905247);
    map.insert("Gd", 157.924103);
    map.insert("Pt", 194.964766);
    map.insert("Au", 196.966543);
    map.insert("Hg", 201.970617);
    map.insert("Tl", 204.974427);
    map.insert("Pb", 207.976627);
    map.insert("Bi", 208.980384);
    map.insert("U", 238.050786);
    map
});

/// Valences used for the ring-plus-double-bond equivalent.
static RDBE_VALENCES: LazyLock<HashMap<&'static str, u32>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for element in ["H", "F", "Cl", "Br", "I", "Li", "Na", "K", "Rb", "Cs", "Ag"] {
        map.insert(element, 1);
    }
    for element in ["O", "S", "Se", "Te", "Mg", "Ca", "Sr", "Ba", "Zn", "Cu", "Fe", "Hg"] {
        map.insert(element, 2);
    }
    for element in ["N", "P", "B", "As", "Sb", "Al", "Ga", "Bi"] {
        map.insert(element, 3);
    }
    for element in ["C", "Si", "Ge", "Sn", "Pb", "Ti"] {
        map.insert(element, 4);
    }
    map
});

/// monoisotopic mass of a single atom
///
/// Arguments:
///
/// * `symbol` - element symbol, case sensitive
///
/// Returns:
///
/// * `Option<f64>` - the mass, `None` for an unknown symbol
///
/// # Examples
///
/// ```
/// use msdenoise::chemistry::elements::monoisotopic_mass;
///
/// assert_eq!(monoisotopic_mass("C"), Some(12.0));
/// assert_eq!(monoisotopic_mass("Xx"), None);
/// ```
pub fn monoisotopic_mass(symbol: &str) -> Option<f64> {
    MONOISOTOPIC_MASSES.get(symbol).copied()
}

pub fn is_known_element(symbol: &str) -> bool {
    MONOISOTOPIC_MASSES.contains_key(symbol)
}

/// Typical valence of an element, `None` when the element has no single useful valence.
pub fn rdbe_valence(symbol: &str) -> Option<u32> {
    RDBE_VALENCES.get(symbol).copied()
}

/// Allowed valences of the SMILES organic subset, lowest first.
///
/// Atoms written outside brackets take implicit hydrogens up to the lowest
/// valence that is not exceeded by their explicit bonds.
pub fn organic_subset_valences(symbol: &str) -> Option<&'static [u32]> {
    match symbol {
        "B" => Some(&[3]),
        "C" => Some(&[4]),
        "N" => Some(&[3, 5]),
        "O" => Some(&[2]),
        "P" => Some(&[3, 5]),
        "S" => Some(&[2, 4, 6]),
        "F" | "Cl" | "Br" | "I" => Some(&[1]),
        _ => None,
    }
}
