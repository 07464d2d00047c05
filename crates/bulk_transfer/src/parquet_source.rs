//! Parquet-backed export source
//!
//! Layout written by the storage side:
//!
//! ```text
//! <root>/asset<NNN>/<YYYY-MM-DD>/ch<NN>/part-<NNNN>.parquet
//! ```
//!
//! Each file holds `timestamp` (UTF-8, RFC 3339) and `value` (double)
//! columns, plus the channel calibration as JSON under the `calibration`
//! key/value metadata entry. Files are read on the blocking pool and handed
//! out in batches, so a channel is never held in memory as a whole.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use contracts::CalibrationSpec;
use futures_util::stream;
use futures_util::StreamExt;
use parquet::errors::ParquetError;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::RowAccessor;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::source::{ChannelSeries, ExportSource, SeriesStream};

/// Key/value metadata entry holding the calibration JSON
pub const CALIBRATION_METADATA_KEY: &str = "calibration";

/// Serves stored parquet rows
#[derive(Debug, Clone)]
pub struct ParquetSource {
    root: PathBuf,
    batch_rows: usize,
}

impl ParquetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batch_rows: 4096,
        }
    }

    /// Rows per batch handed to the CSV writer
    pub fn with_batch_rows(mut self, batch_rows: usize) -> Self {
        self.batch_rows = batch_rows.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one channel on one day
    pub fn day_dir(&self, asset: u32, day: NaiveDate, channel: u32) -> PathBuf {
        self.root
            .join(format!("asset{asset:03}"))
            .join(day.format("%Y-%m-%d").to_string())
            .join(format!("ch{channel:02}"))
    }

    /// Parquet files covering `[start, end]`, day by day, sorted by name
    fn channel_files(
        &self,
        asset: u32,
        channel: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for day in date_range(start.date_naive(), end.date_naive()) {
            let dir = self.day_dir(asset, day, channel);
            if !dir.is_dir() {
                continue;
            }
            let mut day_files: Vec<PathBuf> = std::fs::read_dir(&dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "parquet"))
                .collect();
            day_files.sort();
            files.extend(day_files);
        }
        Ok(files)
    }
}

impl ExportSource for ParquetSource {
    async fn channel_series(
        &self,
        asset: u32,
        channel: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<SeriesStream>, String> {
        let source = self.clone();
        let files = tokio::task::spawn_blocking(move || source.channel_files(asset, channel, start, end))
            .await
            .map_err(|e| format!("file listing aborted: {e}"))?
            .map_err(|e| format!("cannot list parquet files: {e}"))?;
        if files.is_empty() {
            debug!(asset, channel, "no parquet files in range");
            return Ok(None);
        }

        let (tx, rx) = mpsc::channel(2);
        let batch_rows = self.batch_rows;
        tokio::task::spawn_blocking(move || {
            for path in files {
                match read_file(&path, start, end, batch_rows, &tx) {
                    Ok(true) => {}
                    // receiver dropped, the export was abandoned
                    Ok(false) => return,
                    Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable parquet file"),
                }
            }
        });

        let batches = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|batch| (Ok(batch), rx))
        });
        Ok(Some(batches.boxed()))
    }
}

/// Send the in-range rows of one file; `Ok(false)` when the receiver is gone
fn read_file(
    path: &Path,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    batch_rows: usize,
    tx: &mpsc::Sender<ChannelSeries>,
) -> Result<bool, ParquetError> {
    let reader = SerializedFileReader::new(File::open(path)?)?;
    let calibration = read_calibration_from_metadata(&reader, path);

    let mut rows = Vec::with_capacity(batch_rows);
    for row in reader.get_row_iter(None)? {
        let row = row?;
        let timestamp = row.get_string(0)?;
        let in_range = DateTime::parse_from_rfc3339(timestamp)
            .map(|parsed| {
                let parsed = parsed.with_timezone(&Utc);
                parsed >= start && parsed <= end
            })
            .unwrap_or(false);
        if !in_range {
            continue;
        }
        rows.push((timestamp.clone(), row.get_double(1)?));

        if rows.len() >= batch_rows {
            let batch = ChannelSeries {
                calibration: calibration.clone(),
                rows: std::mem::replace(&mut rows, Vec::with_capacity(batch_rows)),
            };
            if tx.blocking_send(batch).is_err() {
                return Ok(false);
            }
        }
    }

    if !rows.is_empty() {
        let batch = ChannelSeries { calibration, rows };
        if tx.blocking_send(batch).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Calibration stored with the file; identity when absent or unparsable
pub fn read_calibration_from_metadata<R: FileReader + ?Sized>(reader: &R, path: &Path) -> CalibrationSpec {
    let json = reader
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.key == CALIBRATION_METADATA_KEY)
                .and_then(|entry| entry.value.clone())
        });

    let Some(json) = json else {
        return CalibrationSpec::default();
    };
    match serde_json::from_str::<CalibrationSpec>(&json) {
        Ok(spec) => spec,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "invalid calibration metadata");
            CalibrationSpec::default()
        }
    }
}

/// Every calendar day from `start` to `end`, inclusive
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|day| *day <= end).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::render_csv;
    use contracts::{CalibrationFormula, ExportRequest};
    use parquet::data_type::{ByteArray, ByteArrayType, DoubleType};
    use parquet::file::metadata::KeyValue;
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;
    use std::sync::Arc;

    const SCHEMA: &str = "
        message schema {
            REQUIRED BINARY timestamp (UTF8);
            REQUIRED DOUBLE value;
        }
    ";

    fn write_part(dir: &Path, name: &str, calibration: Option<&str>, rows: &[(&str, f64)]) {
        std::fs::create_dir_all(dir).unwrap();
        let schema = Arc::new(parse_message_type(SCHEMA).unwrap());
        let props = Arc::new(
            WriterProperties::builder()
                .set_key_value_metadata(calibration.map(|json| {
                    vec![KeyValue::new(CALIBRATION_METADATA_KEY.to_string(), json.to_string())]
                }))
                .build(),
        );
        let file = File::create(dir.join(name)).unwrap();
        let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();

        let mut group = writer.next_row_group().unwrap();
        let timestamps: Vec<ByteArray> = rows.iter().map(|(ts, _)| ByteArray::from(*ts)).collect();
        let mut column = group.next_column().unwrap().unwrap();
        column
            .typed::<ByteArrayType>()
            .write_batch(&timestamps, None, None)
            .unwrap();
        column.close().unwrap();

        let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
        let mut column = group.next_column().unwrap().unwrap();
        column
            .typed::<DoubleType>()
            .write_batch(&values, None, None)
            .unwrap();
        column.close().unwrap();

        group.close().unwrap();
        writer.close().unwrap();
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_date_range_is_inclusive() {
        assert_eq!(
            date_range(day("2024-02-28"), day("2024-03-01")),
            vec![day("2024-02-28"), day("2024-02-29"), day("2024-03-01")]
        );
        assert_eq!(date_range(day("2024-01-02"), day("2024-01-01")), Vec::new());
    }

    #[tokio::test]
    async fn test_export_across_days_with_stored_calibration() {
        let root = tempfile::tempdir().unwrap();
        let source = ParquetSource::new(root.path()).with_batch_rows(2);
        write_part(
            &source.day_dir(7, day("2024-03-01"), 1),
            "part-0000.parquet",
            Some(r#"{"id":"lc-1","type":"linear","a":2.0,"b":1.0}"#),
            &[
                ("2024-03-01T23:59:58Z", 1.0),
                ("2024-03-01T23:59:59Z", 2.0),
                ("2024-03-01T12:00:00Z", 9.0),
            ],
        );
        write_part(
            &source.day_dir(7, day("2024-03-02"), 1),
            "part-0000.parquet",
            Some(r#"{"id":"lc-1","type":"linear","a":2.0,"b":1.0}"#),
            &[("2024-03-02T00:00:00Z", 3.0), ("2024-03-02T00:00:05Z", 4.0)],
        );

        let request = ExportRequest::new(7, [1, 2], "2024-03-01T23:59:58Z", "2024-03-02T00:00:01Z").unwrap();
        let rendered = render_csv(&source, &request).await.unwrap();
        let text = std::str::from_utf8(&rendered.body).unwrap();

        assert_eq!(
            text.lines().skip(1).collect::<Vec<_>>(),
            vec![
                "2024-03-01T23:59:58Z,ch01,1,3,lc-1",
                "2024-03-01T23:59:59Z,ch01,2,5,lc-1",
                "2024-03-02T00:00:00Z,ch01,3,7,lc-1",
            ]
        );
        assert_eq!(rendered.missing_channel_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_missing_or_bad_metadata_uses_identity() {
        let root = tempfile::tempdir().unwrap();
        let source = ParquetSource::new(root.path());
        let dir = source.day_dir(1, day("2024-01-01"), 3);
        write_part(&dir, "part-0000.parquet", None, &[("2024-01-01T00:00:00Z", 1.5)]);
        write_part(&dir, "part-0001.parquet", Some("{not json"), &[("2024-01-01T00:00:01Z", 2.5)]);

        let request = ExportRequest::new(1, [3], "2024-01-01T00:00:00Z", "2024-01-01T00:00:02Z").unwrap();
        let rendered = render_csv(&source, &request).await.unwrap();
        let text = std::str::from_utf8(&rendered.body).unwrap();
        assert_eq!(
            text.lines().skip(1).collect::<Vec<_>>(),
            vec![
                "2024-01-01T00:00:00Z,ch03,1.5,1.5,identity",
                "2024-01-01T00:00:01Z,ch03,2.5,2.5,identity",
            ]
        );
    }

    #[tokio::test]
    async fn test_unreadable_file_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let source = ParquetSource::new(root.path());
        let dir = source.day_dir(1, day("2024-01-01"), 1);
        write_part(&dir, "part-0001.parquet", None, &[("2024-01-01T00:00:00Z", 1.0)]);
        std::fs::write(dir.join("part-0000.parquet"), b"not a parquet file").unwrap();
        std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let request = ExportRequest::new(1, [1], "2024-01-01T00:00:00Z", "2024-01-01T00:00:01Z").unwrap();
        let rendered = render_csv(&source, &request).await.unwrap();
        assert_eq!(rendered.body.iter().filter(|b| **b == b'\n').count(), 2);
        assert!(rendered.missing_channel_ids.is_empty());
    }

    #[test]
    fn test_calibration_metadata_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ch01");
        write_part(
            &dir,
            "part-0000.parquet",
            Some(r#"{"id":"poly","type":"polynomial","coeffs":[0.0,2.0]}"#),
            &[("2024-01-01T00:00:00Z", 1.0)],
        );
        let path = dir.join("part-0000.parquet");
        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        let calibration = read_calibration_from_metadata(&reader, &path);
        assert_eq!(calibration.id.as_deref(), Some("poly"));
        assert!(matches!(calibration.formula, CalibrationFormula::Polynomial { .. }));
        assert_eq!(calibration.apply(3.0), 6.0);
    }
}
