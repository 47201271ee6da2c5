//! Bronze → silver adapter.
//!
//! `parse_payload` is the only place that knows the semi-structured payload
//! shape. Everything downstream works on typed `RawRecord`s.
//!
//! Payload keys: `commodity`, `week_ending` (YYYY-MM-DD or MM/DD/YYYY),
//! `destination_country`, `destination_region`, `port`, `class`, `pounds`,
//! and the quality keys named by `QualityField::as_str`. Numbers may arrive
//! as JSON numbers or numeric strings ("1,250,000"); empty strings are absent.

use std::io;
use std::path::Path;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::config::normalize_key;
use crate::domain::{
    validate_record, BronzeRecord, DailyObservation, QualityField, QualityFields, RawRecord,
};
use crate::error::{AdapterError, RecordError};

/// Silver records plus the payloads that could not be mapped.
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub records: Vec<RawRecord>,
    pub failures: Vec<RecordError>,
}

impl NormalizeOutcome {
    pub fn failure_rate(&self) -> f64 {
        let total = self.records.len() + self.failures.len();
        if total == 0 {
            0.0
        } else {
            self.failures.len() as f64 / total as f64
        }
    }
}

fn text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_text(
    payload: &Map<String, Value>,
    certificate_id: &str,
    field: &'static str,
) -> Result<String, RecordError> {
    text(payload, field).ok_or_else(|| RecordError::MissingField {
        certificate_id: certificate_id.to_string(),
        field,
    })
}

fn number(
    payload: &Map<String, Value>,
    certificate_id: &str,
    field: &'static str,
) -> Result<Option<f64>, RecordError> {
    let malformed = |value: &Value| RecordError::Malformed {
        certificate_id: certificate_id.to_string(),
        field,
        value: value.to_string(),
    };
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| malformed(&Value::Number(n.clone()))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map(Some)
            .map_err(|_| malformed(&Value::String(s.clone()))),
        Some(other) => Err(malformed(other)),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

/// Map one bronze payload to a validated silver record.
pub fn parse_payload(bronze: &BronzeRecord) -> Result<RawRecord, RecordError> {
    let id = bronze.certificate_id.as_str();
    let payload = bronze.payload.as_object().ok_or_else(|| RecordError::Malformed {
        certificate_id: id.to_string(),
        field: "payload",
        value: bronze.payload.to_string(),
    })?;

    let commodity = normalize_key(&required_text(payload, id, "commodity")?);
    let week_raw = required_text(payload, id, "week_ending")?;
    let week_ending = parse_date(&week_raw).ok_or_else(|| RecordError::Malformed {
        certificate_id: id.to_string(),
        field: "week_ending",
        value: week_raw.clone(),
    })?;
    let destination_country = normalize_key(&required_text(payload, id, "destination_country")?);
    let pounds = number(payload, id, "pounds")?.ok_or_else(|| RecordError::MissingField {
        certificate_id: id.to_string(),
        field: "pounds",
    })?;

    let mut quality = QualityFields::default();
    for field in QualityField::ALL {
        quality.set(field, number(payload, id, field.as_str())?);
    }

    let record = RawRecord {
        certificate_id: id.to_string(),
        commodity,
        week_ending,
        destination_country,
        destination_region: text(payload, "destination_region").map(|s| normalize_key(&s)),
        port: text(payload, "port").map(|s| normalize_key(&s)),
        class: text(payload, "class").map(|s| normalize_key(&s)),
        pounds,
        quality,
    };
    validate_record(&record)?;
    Ok(record)
}

/// Week-ending date of a payload, even when the rest of it is malformed.
pub fn payload_week(bronze: &BronzeRecord) -> Option<NaiveDate> {
    let payload = bronze.payload.as_object()?;
    parse_date(&text(payload, "week_ending")?)
}

/// Map every bronze payload, collecting failures instead of stopping.
pub fn normalize(bronze: &[BronzeRecord]) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();
    for record in bronze {
        match parse_payload(record) {
            Ok(r) => outcome.records.push(r),
            Err(e) => outcome.failures.push(e),
        }
    }
    outcome
}

/// Read a certificate CSV export into bronze payloads.
///
/// Every column becomes a string payload field. `certificate_id` names the
/// record (rows without one get `row-N`); `ingested_on`, when present,
/// overrides `default_ingested`.
pub fn read_bronze_csv<R: io::Read>(
    reader: R,
    default_ingested: NaiveDate,
) -> Result<Vec<BronzeRecord>, AdapterError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let mut out = Vec::new();

    for (index, row) in rdr.records().enumerate() {
        let row = row?;
        let mut payload = Map::new();
        for (header, value) in headers.iter().zip(row.iter()) {
            payload.insert(header.to_string(), Value::String(value.to_string()));
        }

        let certificate_id =
            text(&payload, "certificate_id").unwrap_or_else(|| format!("row-{}", index + 1));
        let ingested_on = match text(&payload, "ingested_on") {
            Some(raw) => parse_date(&raw).ok_or_else(|| AdapterError::Row {
                row: index + 1,
                message: format!("invalid ingested_on '{raw}'"),
            })?,
            None => default_ingested,
        };

        out.push(BronzeRecord {
            certificate_id,
            ingested_on,
            payload: Value::Object(payload),
        });
    }
    Ok(out)
}

pub fn load_bronze_csv(
    path: &Path,
    default_ingested: NaiveDate,
) -> Result<Vec<BronzeRecord>, AdapterError> {
    let file = std::fs::File::open(path)?;
    read_bronze_csv(file, default_ingested)
}

/// Read a daily series CSV with columns `series,date,value`.
pub fn read_daily_csv<R: io::Read>(reader: R) -> Result<Vec<DailyObservation>, AdapterError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut out = Vec::new();
    for row in rdr.deserialize::<DailyObservation>() {
        out.push(row?);
    }
    Ok(out)
}

pub fn load_daily_csv(path: &Path) -> Result<Vec<DailyObservation>, AdapterError> {
    let file = std::fs::File::open(path)?;
    read_daily_csv(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bronze(payload: Value) -> BronzeRecord {
        BronzeRecord {
            certificate_id: "C-1".into(),
            ingested_on: NaiveDate::from_ymd_opt(2024, 9, 6).unwrap(),
            payload,
        }
    }

    #[test]
    fn parses_numbers_and_numeric_strings() {
        let record = parse_payload(&bronze(json!({
            "commodity": "corn",
            "week_ending": "2024-09-05",
            "destination_country": "Japan",
            "destination_region": "asia",
            "port": "New Orleans",
            "pounds": "1,250,000",
            "moisture": 14.2,
            "protein": "",
        })))
        .unwrap();

        assert_eq!(record.commodity, "CORN");
        assert_eq!(record.destination_country, "JAPAN");
        assert_eq!(record.destination_region.as_deref(), Some("ASIA"));
        assert_eq!(record.port.as_deref(), Some("NEW ORLEANS"));
        assert_eq!(record.pounds, 1_250_000.0);
        assert_eq!(record.quality.moisture, Some(14.2));
        assert_eq!(record.quality.protein, None);
    }

    #[test]
    fn accepts_us_date_format() {
        let record = parse_payload(&bronze(json!({
            "commodity": "WHEAT",
            "week_ending": "09/05/2024",
            "destination_country": "EGYPT",
            "pounds": 10,
        })))
        .unwrap();
        assert_eq!(record.week_ending, NaiveDate::from_ymd_opt(2024, 9, 5).unwrap());
    }

    #[test]
    fn missing_pounds_is_missing_field() {
        let err = parse_payload(&bronze(json!({
            "commodity": "CORN",
            "week_ending": "2024-09-05",
            "destination_country": "JAPAN",
        })))
        .unwrap_err();
        assert!(matches!(err, RecordError::MissingField { field: "pounds", .. }));
    }

    #[test]
    fn garbage_number_is_malformed() {
        let err = parse_payload(&bronze(json!({
            "commodity": "CORN",
            "week_ending": "2024-09-05",
            "destination_country": "JAPAN",
            "pounds": "lots",
        })))
        .unwrap_err();
        assert!(matches!(err, RecordError::Malformed { field: "pounds", .. }));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        let err = parse_payload(&bronze(json!([1, 2, 3]))).unwrap_err();
        assert!(matches!(err, RecordError::Malformed { field: "payload", .. }));
    }

    #[test]
    fn payload_week_survives_other_defects() {
        let b = bronze(json!({ "week_ending": "09/12/2024", "pounds": "n/a" }));
        assert_eq!(payload_week(&b), NaiveDate::from_ymd_opt(2024, 9, 12));
        assert_eq!(payload_week(&bronze(json!("flat"))), None);
    }

    #[test]
    fn normalize_collects_failures() {
        let good = bronze(json!({
            "commodity": "CORN",
            "week_ending": "2024-09-05",
            "destination_country": "JAPAN",
            "pounds": 5,
        }));
        let bad = bronze(json!({ "commodity": "CORN" }));
        let outcome = normalize(&[good, bad]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failure_rate(), 0.5);
    }

    #[test]
    fn reads_bronze_csv_rows() {
        let csv = "certificate_id,commodity,week_ending,destination_country,\
                   port,pounds,ingested_on\n\
                   A1,CORN,2024-09-05,JAPAN,HOUSTON,1000,2024-09-06\n\
                   ,CORN,2024-09-05,MEXICO,,500,\n";
        let default = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        let rows = read_bronze_csv(csv.as_bytes(), default).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].certificate_id, "A1");
        assert_eq!(rows[0].ingested_on, NaiveDate::from_ymd_opt(2024, 9, 6).unwrap());
        assert_eq!(rows[1].certificate_id, "row-2");
        assert_eq!(rows[1].ingested_on, default);

        let outcome = normalize(&rows);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[1].port, None);
    }

    #[test]
    fn bad_ingestion_date_names_the_row() {
        let csv = "certificate_id,ingested_on\nA1,yesterday\n";
        let err = read_bronze_csv(csv.as_bytes(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .unwrap_err();
        assert!(matches!(err, AdapterError::Row { row: 1, .. }));
    }

    #[test]
    fn reads_daily_csv() {
        let csv = "series,date,value\nCORN_POUNDS,2024-09-01,10.5\nCORN_POUNDS,2024-09-02,11\n";
        let rows = read_daily_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value, 11.0);
    }
}
