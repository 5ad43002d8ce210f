//! Line-oriented codec for streaming transcript records.
//!
//! One CSV row per word: `start_ns, end_ns, is_final (0/1), confidence,
//! text`. This is the wire format between the transcription process and the
//! annotation pipeline; the annotation output is the same row with one more
//! column appended.

use crate::error::{DiscimError, Result};
use crate::transcript::StreamingTranscriptRecord;
use std::io::{Read, Write};
use std::time::Duration;

/// Index of the word column in a raw record row.
pub const TEXT_COLUMN: usize = 4;

/// Writes streaming transcript records as CSV rows.
pub struct RawWriter<W: Write> {
    inner: csv::Writer<W>,
}

impl<W: Write> RawWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: csv::Writer::from_writer(writer),
        }
    }

    /// Writes one record as a row.
    pub fn write(&mut self, record: &StreamingTranscriptRecord) -> Result<()> {
        self.inner.write_record([
            record.start.as_nanos().to_string(),
            record.end.as_nanos().to_string(),
            if record.is_final { "1" } else { "0" }.to_string(),
            record.confidence.to_string(),
            record.text.clone(),
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Reads streaming transcript records from CSV rows.
pub struct RawReader<R: Read> {
    inner: csv::Reader<R>,
}

impl<R: Read> RawReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: csv::ReaderBuilder::new()
                .has_headers(false)
                .from_reader(reader),
        }
    }

    /// Reads the next record, or `None` at end of input.
    pub fn read(&mut self) -> Option<Result<StreamingTranscriptRecord>> {
        let mut row = csv::StringRecord::new();
        match self.inner.read_record(&mut row) {
            Ok(false) => None,
            Ok(true) => Some(parse_row(&row)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

fn parse_row(row: &csv::StringRecord) -> Result<StreamingTranscriptRecord> {
    if row.len() < 5 {
        return Err(DiscimError::Record {
            message: format!("raw record has {} columns, expected 5", row.len()),
        });
    }

    let start_ns: u64 = parse_field(row, 0, "start_ns")?;
    let end_ns: u64 = parse_field(row, 1, "end_ns")?;
    let is_final = match &row[2] {
        "1" => true,
        "0" => false,
        other => {
            return Err(DiscimError::Record {
                message: format!("invalid is_final flag: {other:?}"),
            })
        }
    };
    let confidence: f64 = parse_field(row, 3, "confidence")?;

    Ok(StreamingTranscriptRecord {
        start: Duration::from_nanos(start_ns),
        end: Duration::from_nanos(end_ns),
        text: row[4].to_string(),
        is_final,
        confidence,
    })
}

fn parse_field<T: std::str::FromStr>(
    row: &csv::StringRecord,
    index: usize,
    name: &str,
) -> Result<T> {
    row[index].parse().map_err(|_| DiscimError::Record {
        message: format!("invalid {name} field: {:?}", &row[index]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(start_ms: u64, end_ms: u64, text: &str) -> StreamingTranscriptRecord {
        StreamingTranscriptRecord {
            start: Duration::from_millis(start_ms),
            end: Duration::from_millis(end_ms),
            text: text.to_string(),
            is_final: true,
            confidence: 0.75,
        }
    }

    #[test]
    fn test_write_format() {
        let mut buffer = Vec::new();
        {
            let mut writer = RawWriter::new(&mut buffer);
            writer.write(&make_record(500, 800, "hello")).unwrap();
            writer.flush().unwrap();
        }

        let written = String::from_utf8(buffer).unwrap();
        assert_eq!(written, "500000000,800000000,1,0.75,hello\n");
    }

    #[test]
    fn test_text_column_matches_layout() {
        let mut buffer = Vec::new();
        {
            let mut writer = RawWriter::new(&mut buffer);
            writer.write(&make_record(0, 100, "word")).unwrap();
            writer.flush().unwrap();
        }

        let written = String::from_utf8(buffer).unwrap();
        let fields: Vec<&str> = written.trim().split(',').collect();
        assert_eq!(fields[TEXT_COLUMN], "word");
    }

    #[test]
    fn test_read_back() {
        let mut buffer = Vec::new();
        {
            let mut writer = RawWriter::new(&mut buffer);
            writer.write(&make_record(500, 800, "hello")).unwrap();
            writer.write(&make_record(900, 1200, "world")).unwrap();
            writer.flush().unwrap();
        }

        let mut reader = RawReader::new(buffer.as_slice());
        let first = reader.read().unwrap().unwrap();
        assert_eq!(first, make_record(500, 800, "hello"));
        let second = reader.read().unwrap().unwrap();
        assert_eq!(second.text, "world");
        assert!(reader.read().is_none());
    }

    #[test]
    fn test_read_interim_flag() {
        let input = "0,100000000,0,0,uh\n";
        let mut reader = RawReader::new(input.as_bytes());
        let record = reader.read().unwrap().unwrap();
        assert!(!record.is_final);
        assert_eq!(record.confidence, 0.0);
    }

    #[test]
    fn test_read_rejects_bad_flag() {
        let input = "0,100,2,0.5,word\n";
        let mut reader = RawReader::new(input.as_bytes());
        let result = reader.read().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_read_rejects_short_row() {
        let input = "0,100,1\n";
        let mut reader = RawReader::new(input.as_bytes());
        let result = reader.read().unwrap();
        assert!(matches!(result, Err(DiscimError::Record { .. })));
    }

    #[test]
    fn test_text_with_comma_is_quoted() {
        let mut buffer = Vec::new();
        {
            let mut writer = RawWriter::new(&mut buffer);
            writer.write(&make_record(0, 100, "well,")).unwrap();
            writer.flush().unwrap();
        }

        let mut reader = RawReader::new(buffer.as_slice());
        let record = reader.read().unwrap().unwrap();
        assert_eq!(record.text, "well,");
    }
}
