use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Largest precursor charge magnitude a record may carry.
pub const MAX_PRECURSOR_CHARGE: u32 = 10;

/// A single centroided fragment peak.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
}

impl Peak {
    pub fn new(mz: f64, intensity: f64) -> Self {
        Peak { mz, intensity }
    }

    pub fn is_valid(&self) -> bool {
        self.mz.is_finite() && self.mz > 0.0 && self.intensity.is_finite() && self.intensity >= 0.0
    }
}

/// Passthrough fields of a library entry (compound name, retention time, comments, ...).
///
/// The denoising core never looks inside. Values are shared behind an `Arc` so a
/// cleaned record carries the very same metadata as its source at O(1) cost.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Arc<BTreeMap<String, serde_json::Value>>);

impl Metadata {
    pub fn new(fields: BTreeMap<String, serde_json::Value>) -> Self {
        Metadata(Arc::new(fields))
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether two handles share the same underlying storage.
    pub fn ptr_eq(&self, other: &Metadata) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl FromIterator<(String, serde_json::Value)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, serde_json::Value)>>(iter: T) -> Self {
        Metadata::new(iter.into_iter().collect())
    }
}

/// One MS/MS spectrum of a spectral library together with its precursor description.
///
/// Records are inputs only: denoising never mutates a record, it builds a new one
/// with [`SpectralRecord::with_peaks`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectralRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub precursor_formula: String,
    /// SMILES of the precursor, enables bond-cleavage candidates
    #[serde(default)]
    pub precursor_structure: Option<String>,
    /// ion type such as `[M+H]+`; without it the formula is the ion formula itself
    #[serde(default)]
    pub adduct: Option<String>,
    pub precursor_mz: f64,
    pub precursor_charge: i32,
    pub peaks: Vec<Peak>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SpectralRecord {
    pub fn new(precursor_formula: &str, precursor_mz: f64, precursor_charge: i32, peaks: Vec<Peak>) -> Self {
        SpectralRecord {
            id: None,
            precursor_formula: precursor_formula.to_string(),
            precursor_structure: None,
            adduct: None,
            precursor_mz,
            precursor_charge,
            peaks,
            metadata: Metadata::default(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_structure(mut self, smiles: &str) -> Self {
        self.precursor_structure = Some(smiles.to_string());
        self
    }

    pub fn with_adduct(mut self, adduct: &str) -> Self {
        self.adduct = Some(adduct.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// A new record sharing everything with this one except the peak list.
    pub fn with_peaks(&self, peaks: Vec<Peak>) -> Self {
        SpectralRecord {
            id: self.id.clone(),
            precursor_formula: self.precursor_formula.clone(),
            precursor_structure: self.precursor_structure.clone(),
            adduct: self.adduct.clone(),
            precursor_mz: self.precursor_mz,
            precursor_charge: self.precursor_charge,
            peaks,
            metadata: self.metadata.clone(),
        }
    }

    /// Check the peak list and charge invariants.
    ///
    /// # Example
    ///
    /// ```
    /// use msdenoise::data::spectrum::{Peak, SpectralRecord};
    ///
    /// let record = SpectralRecord::new("H2O", 19.018, 1, vec![Peak::new(19.018, 100.0)]);
    /// assert!(record.validate().is_ok());
    ///
    /// let record = SpectralRecord::new("H2O", 19.018, 1, vec![]);
    /// assert!(record.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.precursor_charge == 0 || self.precursor_charge.unsigned_abs() > MAX_PRECURSOR_CHARGE {
            return Err(RecordError::InvalidCharge {
                charge: self.precursor_charge,
                max: MAX_PRECURSOR_CHARGE,
            });
        }
        if self.peaks.is_empty() {
            return Err(RecordError::EmptyPeakList);
        }
        if let Some((index, peak)) = self.peaks.iter().enumerate().find(|(_, p)| !p.is_valid()) {
            return Err(RecordError::InvalidPeak {
                index,
                mz: peak.mz,
                intensity: peak.intensity,
            });
        }
        Ok(())
    }
}

impl Display for SpectralRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SpectralRecord(id: {}, formula: {}, precursor m/z: {:.4}, charge: {}, peaks: {})",
            self.id.as_deref().unwrap_or("-"),
            self.precursor_formula,
            self.precursor_mz,
            self.precursor_charge,
            self.peaks.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SpectralRecord {
        let metadata: Metadata = [
            ("name".to_string(), serde_json::json!("Phenylalanine")),
            ("rt".to_string(), serde_json::json!(3.21)),
        ]
        .into_iter()
        .collect();
        SpectralRecord::new(
            "C9H11NO2",
            166.0863,
            1,
            vec![Peak::new(120.081, 100.0), Peak::new(166.086, 20.0)],
        )
        .with_id("phe-1")
        .with_metadata(metadata)
    }

    #[test]
    fn test_with_peaks_shares_metadata() {
        let original = record();
        let cleaned = original.with_peaks(vec![original.peaks[0]]);
        assert_eq!(cleaned.peaks.len(), 1);
        assert_eq!(original.peaks.len(), 2);
        assert!(cleaned.metadata.ptr_eq(&original.metadata));
        assert_eq!(cleaned.id.as_deref(), Some("phe-1"));
        assert_eq!(cleaned.metadata.get("name"), Some(&serde_json::json!("Phenylalanine")));
    }

    #[test]
    fn test_validate_rejects_bad_peaks() {
        let mut r = record();
        r.peaks.push(Peak::new(f64::NAN, 1.0));
        assert_eq!(r.validate().unwrap_err().kind(), crate::error::RecordErrorKind::InvalidPeak);

        let mut r = record();
        r.peaks[1].intensity = -1.0;
        assert!(matches!(r.validate(), Err(RecordError::InvalidPeak { index: 1, .. })));

        let mut r = record();
        r.precursor_charge = 0;
        assert_eq!(r.validate(), Err(RecordError::InvalidCharge { charge: 0, max: MAX_PRECURSOR_CHARGE }));
    }

    #[test]
    fn test_validate_bounds_charge() {
        let mut r = record();
        r.precursor_charge = -(MAX_PRECURSOR_CHARGE as i32);
        assert!(r.validate().is_ok());

        r.precursor_charge = MAX_PRECURSOR_CHARGE as i32 + 1;
        assert!(matches!(r.validate(), Err(RecordError::InvalidCharge { .. })));

        r.precursor_charge = i32::MIN;
        assert!(matches!(r.validate(), Err(RecordError::InvalidCharge { .. })));
    }

    #[test]
    fn test_serde_defaults() {
        let json = r#"{
            "precursor_formula": "C9H11NO2",
            "precursor_mz": 166.0863,
            "precursor_charge": 1,
            "peaks": [{"mz": 120.081, "intensity": 100.0}],
            "metadata": {"name": "Phe"}
        }"#;
        let r: SpectralRecord = serde_json::from_str(json).unwrap();
        assert!(r.id.is_none());
        assert!(r.precursor_structure.is_none());
        assert_eq!(r.metadata.len(), 1);
        assert_eq!(r.peaks[0], Peak::new(120.081, 100.0));
    }
}
