//! Bronze payloads and silver (normalized) certificate records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// One ingested, still semi-structured certificate payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BronzeRecord {
    pub certificate_id: String,
    /// Day the payload landed in the bronze layer.
    pub ingested_on: NaiveDate,
    pub payload: serde_json::Value,
}

/// Quality measurements carried by a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityField {
    TestWeight,
    Moisture,
    Protein,
    Dockage,
    ForeignMaterial,
    TotalDamage,
}

impl QualityField {
    pub const ALL: [QualityField; 6] = [
        QualityField::TestWeight,
        QualityField::Moisture,
        QualityField::Protein,
        QualityField::Dockage,
        QualityField::ForeignMaterial,
        QualityField::TotalDamage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestWeight => "test_weight",
            Self::Moisture => "moisture",
            Self::Protein => "protein",
            Self::Dockage => "dockage",
            Self::ForeignMaterial => "foreign_material",
            Self::TotalDamage => "total_damage",
        }
    }
}

/// Optional quality values. An absent value is excluded from averages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityFields {
    pub test_weight: Option<f64>,
    pub moisture: Option<f64>,
    pub protein: Option<f64>,
    pub dockage: Option<f64>,
    pub foreign_material: Option<f64>,
    pub total_damage: Option<f64>,
}

impl QualityFields {
    pub fn get(&self, field: QualityField) -> Option<f64> {
        match field {
            QualityField::TestWeight => self.test_weight,
            QualityField::Moisture => self.moisture,
            QualityField::Protein => self.protein,
            QualityField::Dockage => self.dockage,
            QualityField::ForeignMaterial => self.foreign_material,
            QualityField::TotalDamage => self.total_damage,
        }
    }

    pub fn set(&mut self, field: QualityField, value: Option<f64>) {
        let slot = match field {
            QualityField::TestWeight => &mut self.test_weight,
            QualityField::Moisture => &mut self.moisture,
            QualityField::Protein => &mut self.protein,
            QualityField::Dockage => &mut self.dockage,
            QualityField::ForeignMaterial => &mut self.foreign_material,
            QualityField::TotalDamage => &mut self.total_damage,
        };
        *slot = value;
    }

    /// Populated fields only.
    pub fn present(&self) -> impl Iterator<Item = (QualityField, f64)> + '_ {
        QualityField::ALL
            .into_iter()
            .filter_map(move |f| self.get(f).map(|v| (f, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

/// One normalized inspection certificate (silver layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub certificate_id: String,
    /// Upper-case commodity name.
    pub commodity: String,
    pub week_ending: NaiveDate,
    pub destination_country: String,
    pub destination_region: Option<String>,
    pub port: Option<String>,
    /// Class label within a commodity family (e.g. "HRW" for wheat).
    pub class: Option<String>,
    pub pounds: f64,
    #[serde(default)]
    pub quality: QualityFields,
}

/// Check that a record can take part in aggregation.
///
/// Invalid records are skipped by the caller and counted, never fatal.
pub fn validate_record(record: &RawRecord) -> Result<&RawRecord, RecordError> {
    if record.destination_country.trim().is_empty() {
        return Err(RecordError::MissingField {
            certificate_id: record.certificate_id.clone(),
            field: "destination_country",
        });
    }
    if !record.pounds.is_finite() || record.pounds < 0.0 {
        return Err(RecordError::OutOfRange {
            certificate_id: record.certificate_id.clone(),
            field: "pounds",
            value: record.pounds,
        });
    }
    for (field, value) in record.quality.present() {
        if !value.is_finite() {
            return Err(RecordError::OutOfRange {
                certificate_id: record.certificate_id.clone(),
                field: field.as_str(),
                value,
            });
        }
    }
    Ok(record)
}

/// One value of a daily series (silver layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyObservation {
    pub series: String,
    pub date: NaiveDate,
    pub value: f64,
}
