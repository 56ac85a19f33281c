use crate::file::csv::error::CsvError;
use chrono::NaiveDate;
use model::records::deal::DealRecord;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// How many rejected rows get an individual warning before the rest are
/// summarized in one line.
const REJECT_WARN_LIMIT: usize = 3;

/// Parses a delta CSV drop into validated deal records.
///
/// Rows without a contact key are dropped before they ever reach the
/// pipeline; they are data-quality rejects, not upload failures. Date
/// columns are normalized to epoch-millisecond timestamps the CRM accepts.
pub struct CsvDealSource {
    delimiter: u8,
    contact_key_column: String,
    /// Columns holding dates to normalize to epoch milliseconds.
    date_columns: Vec<String>,
    /// Column used to name a row in log messages, nothing more.
    name_column: String,
}

#[derive(Debug)]
pub struct CsvParseSummary {
    pub records: Vec<DealRecord>,
    /// Data rows read, valid or not.
    pub rows_read: usize,
    /// Rows dropped for a missing contact key.
    pub missing_contact_key: usize,
    /// Date cells that could not be parsed and were nulled out.
    pub invalid_dates: usize,
}

impl Default for CsvDealSource {
    fn default() -> Self {
        CsvDealSource {
            delimiter: b';',
            contact_key_column: "contact_id".to_string(),
            date_columns: vec!["closedate".to_string()],
            name_column: "linea".to_string(),
        }
    }
}

impl CsvDealSource {
    pub fn new(delimiter: u8, contact_key_column: impl Into<String>) -> Self {
        CsvDealSource {
            delimiter,
            contact_key_column: contact_key_column.into(),
            ..Self::default()
        }
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<CsvParseSummary, CsvError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let key_idx = headers
            .iter()
            .position(|h| h == &self.contact_key_column)
            .ok_or_else(|| CsvError::MissingColumn(self.contact_key_column.clone()))?;
        let name_idx = headers.iter().position(|h| h == &self.name_column);

        let mut summary = CsvParseSummary {
            records: Vec::new(),
            rows_read: 0,
            missing_contact_key: 0,
            invalid_dates: 0,
        };

        for row in reader.records() {
            let row = row?;
            summary.rows_read += 1;

            let contact_key = row.get(key_idx).unwrap_or("").trim();
            if contact_key.is_empty() {
                summary.missing_contact_key += 1;
                if summary.missing_contact_key <= REJECT_WARN_LIMIT {
                    let name = name_idx
                        .and_then(|i| row.get(i))
                        .filter(|n| !n.is_empty())
                        .unwrap_or("<unnamed>");
                    warn!(row = summary.rows_read, name, "Row has no contact key, dropping");
                }
                continue;
            }

            let mut properties = BTreeMap::new();
            for (idx, header) in headers.iter().enumerate() {
                if idx == key_idx {
                    continue;
                }
                let cell = row.get(idx).unwrap_or("").trim();

                let value = if self.date_columns.iter().any(|c| c == header) {
                    match normalize_date(cell) {
                        DateCell::Timestamp(ts) => Value::from(ts),
                        DateCell::Empty => Value::Null,
                        DateCell::Invalid => {
                            summary.invalid_dates += 1;
                            warn!(row = summary.rows_read, column = %header, cell, "Unparseable date, nulling");
                            Value::Null
                        }
                    }
                } else if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };

                properties.insert(header.clone(), value);
            }

            summary.records.push(DealRecord::new(contact_key, properties));
        }

        if summary.missing_contact_key > REJECT_WARN_LIMIT {
            warn!(
                additional = summary.missing_contact_key - REJECT_WARN_LIMIT,
                "More rows dropped for missing contact keys"
            );
        }

        Ok(summary)
    }
}

enum DateCell {
    Timestamp(i64),
    Empty,
    Invalid,
}

/// Normalizes a date cell to epoch milliseconds.
///
/// Numeric cells are taken as already-converted timestamps. Bare dates get a
/// noon time so timezone drift cannot move them across a day boundary.
fn normalize_date(cell: &str) -> DateCell {
    if cell.is_empty() {
        return DateCell::Empty;
    }
    if let Ok(millis) = cell.parse::<i64>() {
        return DateCell::Timestamp(millis);
    }

    let candidate = if looks_like_bare_date(cell) {
        format!("{cell} 12:00:00")
    } else {
        cell.to_string()
    };

    match chrono::NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%d %H:%M:%S") {
        Ok(dt) => DateCell::Timestamp(dt.and_utc().timestamp_millis()),
        Err(_) => DateCell::Invalid,
    }
}

fn looks_like_bare_date(cell: &str) -> bool {
    cell.len() == 10 && NaiveDate::parse_from_str(cell, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &str) -> CsvParseSummary {
        CsvDealSource::default().parse(data.as_bytes()).unwrap()
    }

    #[test]
    fn parses_valid_rows_into_records() {
        let summary = parse(
            "contact_id;linea;amount;closedate\n\
             c-1;Widget A;100;2024-03-01\n\
             c-2;Widget B;250;1709290800000\n",
        );

        assert_eq!(summary.rows_read, 2);
        assert_eq!(summary.records.len(), 2);
        assert_eq!(summary.missing_contact_key, 0);

        let first = &summary.records[0];
        assert_eq!(first.contact_key, "c-1");
        assert_eq!(first.property("linea"), Some(&Value::from("Widget A")));
        // 2024-03-01 12:00:00 UTC
        assert_eq!(first.property("closedate"), Some(&Value::from(1709294400000i64)));

        let second = &summary.records[1];
        assert_eq!(second.property("closedate"), Some(&Value::from(1709290800000i64)));
    }

    #[test]
    fn drops_rows_without_contact_key() {
        let summary = parse(
            "contact_id;linea\n\
             ;No key\n\
             c-9;Has key\n",
        );

        assert_eq!(summary.rows_read, 2);
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.missing_contact_key, 1);
        assert_eq!(summary.records[0].contact_key, "c-9");
    }

    #[test]
    fn invalid_dates_become_null() {
        let summary = parse(
            "contact_id;closedate\n\
             c-1;not-a-date\n",
        );

        assert_eq!(summary.invalid_dates, 1);
        assert_eq!(summary.records[0].property("closedate"), Some(&Value::Null));
    }

    #[test]
    fn empty_cells_become_null() {
        let summary = parse(
            "contact_id;linea;amount\n\
             c-1;;42\n",
        );

        assert_eq!(summary.records[0].property("linea"), Some(&Value::Null));
        assert_eq!(summary.records[0].property("amount"), Some(&Value::from("42")));
    }

    #[test]
    fn missing_contact_column_is_an_error() {
        let result = CsvDealSource::default().parse(b"linea;amount\nA;1\n");
        assert!(matches!(result, Err(CsvError::MissingColumn(_))));
    }

    #[test]
    fn empty_file_yields_no_records() {
        let summary = parse("contact_id;linea\n");
        assert_eq!(summary.rows_read, 0);
        assert!(summary.records.is_empty());
    }
}
