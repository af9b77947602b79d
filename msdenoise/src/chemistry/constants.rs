// Purpose: physical constants used by the mass calculations
pub const MASS_ELECTRON: f64 = 0.00054857990946; // Unified atomic mass unit

// Spacing between the monoisotopic peak and its 13C isotopologues
pub const MASS_C13_SPACING: f64 = 1.0033548378; // Unified atomic mass unit

// Masses closer than this are the same mass for coalescing purposes
pub const MASS_COALESCE_EPSILON: f64 = 1e-6;

// Absorbs float rounding so that an error of exactly the tolerance is a match
pub const TOLERANCE_SLACK: f64 = 1e-9;
