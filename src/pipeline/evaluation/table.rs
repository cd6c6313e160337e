use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::{GroundTruthRecord, PredictionRecord};

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Cannot access table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed table: {0}")]
    Csv(#[from] csv::Error),

    #[error("Table has no header row")]
    Empty,

    #[error("No {role} column; columns present: {}", .present.join(", "))]
    MissingColumn {
        role: &'static str,
        present: Vec<String>,
    },

    #[error("Invalid number '{value}' in column {column} at row {row}")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },
}

// ═══════════════════════════════════════════════════════════
// Schema resolution
// ═══════════════════════════════════════════════════════════

/// Canonical role a table column can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Filename,
    Label,
    Predicted,
    Confidence,
}

impl ColumnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::Label => "label",
            Self::Predicted => "predicted",
            Self::Confidence => "confidence",
        }
    }

    /// Accepted header names, compared case-insensitively after trimming.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Filename => &["filename", "file", "name", "fname", "file_name", "file name", "path"],
            Self::Label => &["true_label", "label", "class", "ground_truth", "gt", "y", "category"],
            Self::Predicted => &["predicted", "prediction", "predicted_label", "pred"],
            Self::Confidence => &["confidence", "probability", "score"],
        }
    }
}

/// Header plus data rows of a parsed CSV table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn parse(text: &str) -> Result<Self, TableError> {
        Self::from_reader(text.as_bytes())
    }

    pub fn read(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Rows may be shorter or longer than the header; blank lines are skipped.
    fn from_reader(reader: impl Read) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{FEFF}').trim().to_string())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(TableError::Empty);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Column playing `role`. Aliases are tried in priority order.
    pub fn resolve(&self, role: ColumnRole) -> Result<usize, TableError> {
        self.find(role).ok_or_else(|| TableError::MissingColumn {
            role: role.as_str(),
            present: self.headers.clone(),
        })
    }

    pub fn find(&self, role: ColumnRole) -> Option<usize> {
        role.aliases().iter().find_map(|alias| {
            self.headers
                .iter()
                .position(|h| h.to_lowercase() == *alias)
        })
    }

    /// Field at (row, column); short rows read as empty.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows[row].get(column).map(String::as_str).unwrap_or("")
    }
}

/// Ground-truth rows with a non-blank filename.
pub fn read_ground_truth(path: &Path) -> Result<Vec<GroundTruthRecord>, TableError> {
    let table = Table::read(path)?;
    ground_truth_from_table(&table)
}

pub fn ground_truth_from_table(table: &Table) -> Result<Vec<GroundTruthRecord>, TableError> {
    let filename = table.resolve(ColumnRole::Filename)?;
    let label = table.resolve(ColumnRole::Label)?;
    Ok((0..table.rows().len())
        .filter(|&r| !table.cell(r, filename).trim().is_empty())
        .map(|r| GroundTruthRecord::new(table.cell(r, filename), table.cell(r, label)))
        .collect())
}

pub fn read_predictions(path: &Path) -> Result<Vec<PredictionRecord>, TableError> {
    let table = Table::read(path)?;
    predictions_from_table(&table)
}

pub fn predictions_from_table(table: &Table) -> Result<Vec<PredictionRecord>, TableError> {
    let filename = table.resolve(ColumnRole::Filename)?;
    let predicted = table.resolve(ColumnRole::Predicted)?;
    let confidence = table.find(ColumnRole::Confidence);

    let mut records = Vec::with_capacity(table.rows().len());
    for r in 0..table.rows().len() {
        if table.cell(r, filename).trim().is_empty() {
            continue;
        }
        let mut record = PredictionRecord::new(table.cell(r, filename), table.cell(r, predicted));
        if let Some(c) = confidence {
            let raw = table.cell(r, c).trim();
            if !raw.is_empty() {
                let value = raw.parse::<f64>().map_err(|_| TableError::InvalidNumber {
                    row: r + 1,
                    column: table.headers()[c].clone(),
                    value: raw.to_string(),
                })?;
                record.confidence = Some(value);
            }
        }
        records.push(record);
    }
    Ok(records)
}

/// Prediction table: filename, predicted, confidence.
pub fn write_prediction_table(path: &Path, records: &[PredictionRecord]) -> Result<(), TableError> {
    let io_error = |source: std::io::Error| TableError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_writer(File::create(path).map_err(io_error)?);
    writer.write_record(["filename", "predicted", "confidence"])?;
    for record in records {
        let confidence = record
            .confidence
            .map(|c| format!("{c:.6}"))
            .unwrap_or_default();
        writer.write_record([
            record.filename.as_str(),
            record.predicted.as_str(),
            confidence.as_str(),
        ])?;
    }
    writer.flush().map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quotes_and_crlf() {
        let text = "filename,label\r\n\"a, b.pdf\",petition\r\n\"say \"\"hi\"\".pdf\",ruling\r\n";
        let table = Table::parse(text).unwrap();
        assert_eq!(table.headers(), ["filename", "label"]);
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.rows()[0], vec!["a, b.pdf", "petition"]);
        assert_eq!(table.rows()[1], vec!["say \"hi\".pdf", "ruling"]);
    }

    #[test]
    fn quoted_newline_stays_in_field() {
        let table = Table::parse("a,b\n\"line1\nline2\",x\n").unwrap();
        assert_eq!(table.cell(0, 0), "line1\nline2");
    }

    #[test]
    fn blank_lines_skipped_and_last_line_without_newline_kept() {
        let table = Table::parse("h1,h2\n\nx,y").unwrap();
        assert_eq!(table.rows(), [vec!["x".to_string(), "y".to_string()]]);
    }

    #[test]
    fn short_rows_and_bom_tolerated() {
        let table = Table::parse("\u{FEFF}filename,label,extra\nx.pdf,\ny.pdf\n").unwrap();
        assert_eq!(table.headers()[0], "filename");
        assert_eq!(table.cell(0, 1), "");
        assert_eq!(table.cell(1, 1), "");
    }

    #[test]
    fn empty_input_has_no_header() {
        assert!(matches!(Table::parse(""), Err(TableError::Empty)));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, b"filename,label\n\xff\xfe.pdf,ruling\n").unwrap();
        assert!(matches!(Table::read(&path), Err(TableError::Csv(_))));
        assert!(matches!(
            Table::read(&dir.path().join("missing.csv")),
            Err(TableError::Io { .. })
        ));
    }

    #[test]
    fn aliases_resolve_case_insensitively() {
        let table = Table::parse("File Name,Category\nx.pdf,petition\n").unwrap();
        assert_eq!(table.resolve(ColumnRole::Filename).unwrap(), 0);
        assert_eq!(table.resolve(ColumnRole::Label).unwrap(), 1);
        let truths = ground_truth_from_table(&table).unwrap();
        assert_eq!(truths, vec![GroundTruthRecord::new("x.pdf", "petition")]);
    }

    #[test]
    fn missing_column_lists_present_headers() {
        let table = Table::parse("document,kind\nx.pdf,petition\n").unwrap();
        let err = table.resolve(ColumnRole::Filename).unwrap_err();
        match &err {
            TableError::MissingColumn { role, present } => {
                assert_eq!(*role, "filename");
                assert_eq!(present, &vec!["document".to_string(), "kind".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("document, kind"));
    }

    #[test]
    fn predictions_read_optional_confidence() {
        let table = Table::parse("filename,prediction,score\na.pdf,ruling,0.8\nb.pdf,contract,\n").unwrap();
        let records = predictions_from_table(&table).unwrap();
        assert_eq!(records[0].confidence, Some(0.8));
        assert_eq!(records[1].confidence, None);

        let bad = Table::parse("filename,predicted,confidence\na.pdf,ruling,high\n").unwrap();
        assert!(matches!(
            predictions_from_table(&bad),
            Err(TableError::InvalidNumber { row: 1, .. })
        ));
    }

    #[test]
    fn prediction_table_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        let records = vec![
            PredictionRecord::new("a.pdf", "ruling").with_confidence(0.75),
            PredictionRecord::new("b, c.pdf", "contract"),
            PredictionRecord::new("weird \"name\".pdf", "ruling").with_confidence(0.5),
        ];
        write_prediction_table(&path, &records).unwrap();
        let back = read_predictions(&path).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn blank_filenames_are_ignored() {
        let table = Table::parse("filename,label\n,petition\nx.pdf,ruling\n").unwrap();
        assert_eq!(ground_truth_from_table(&table).unwrap().len(), 1);
    }
}
