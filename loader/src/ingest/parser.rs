//! Streaming parser for blank-line-delimited review dumps
//!
//! ```text
//! product/productId: B00002066I
//! review/userId: A1RSDE90N6RSZF
//! review/helpfulness: 3/4
//! review/score: 5.0
//! review/time: 939772800
//! review/summary: Inspiring
//! review/text: I hope a lot of people ...
//!
//! product/productId: ...
//! ```
//!
//! Lines without a `": "` separator and lines naming an unknown field are
//! skipped and counted, never fatal. Plain files and `.gz` files are both
//! accepted.

use crate::document::{RawRecord, fields};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read buffer size for source files
const READ_BUFFER_BYTES: usize = 256 * 1024;

/// A review dump on disk.
///
/// Parsing is restartable from the start only: each [`open`](Self::open)
/// begins a fresh pass over the file.
#[derive(Debug, Clone)]
pub struct ReviewSource {
    path: PathBuf,
}

impl ReviewSource {
    /// Create a source for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the dump
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the dump is gzip-compressed (by extension)
    pub fn is_gzip(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
    }

    /// Open a fresh parser positioned at the first record
    pub fn open(&self) -> io::Result<RecordParser<Box<dyn BufRead + Send>>> {
        let file = File::open(&self.path)?;
        let reader: Box<dyn BufRead + Send> = if self.is_gzip() {
            Box::new(BufReader::with_capacity(
                READ_BUFFER_BYTES,
                MultiGzDecoder::new(file),
            ))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, file))
        };
        Ok(RecordParser::new(reader))
    }
}

/// Lazy iterator of [`RawRecord`]s over a buffered reader
///
/// Yields `Err` once if the underlying reader fails, then ends.
pub struct RecordParser<R> {
    reader: R,
    line_no: usize,
    buf: Vec<u8>,
    skipped_lines: u64,
    records: u64,
    finished: bool,
}

impl<R: BufRead> RecordParser<R> {
    /// Wrap a reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: Vec::with_capacity(1024),
            skipped_lines: 0,
            records: 0,
            finished: false,
        }
    }

    /// Lines skipped so far (no separator or unknown field)
    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    /// Records yielded so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Read the next line into `buf`; `Ok(false)` at end of input
    fn read_line(&mut self) -> io::Result<bool> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(false);
        }
        self.line_no += 1;
        Ok(true)
    }

    fn skip(&mut self, reason: &'static str) {
        self.skipped_lines += 1;
        debug!(line = self.line_no, reason, "Skipping source line");
    }
}

impl<R: BufRead> Iterator for RecordParser<R> {
    type Item = io::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut record: Option<RawRecord> = None;

        loop {
            match self.read_line() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }

            let text = String::from_utf8_lossy(&self.buf);
            let line = text.trim();

            if line.is_empty() {
                if record.as_ref().is_some_and(|r| !r.is_empty()) {
                    break;
                }
                continue;
            }

            let Some((field, value)) = split_field(line) else {
                self.skip("missing separator");
                continue;
            };
            if !fields::is_known(field) {
                self.skip("unknown field");
                continue;
            }

            let (field, value) = (field.to_string(), value.to_string());
            let line_no = self.line_no;
            record
                .get_or_insert_with(|| RawRecord::new(line_no))
                .insert(field, value);
        }

        let record = record.filter(|r| !r.is_empty())?;
        self.records += 1;
        Some(Ok(record))
    }
}

/// Split `field: value`. A bare `field:` yields an empty value.
fn split_field(line: &str) -> Option<(&str, &str)> {
    if let Some((field, value)) = line.split_once(": ") {
        return Some((field.trim_end(), value.trim_start()));
    }
    line.strip_suffix(':').map(|field| (field.trim_end(), ""))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};

    const TWO_REVIEWS: &str = "\
product/productId: B00002066I
review/userId: A1RSDE90N6RSZF
review/helpfulness: 3/4
review/score: 5.0
review/time: 939772800
review/summary: Inspiring
review/text: I hope a lot of people hear this cd.

product/productId: B000058A81
review/userId: A1YRBRK2XM5D5
review/score: 4.0
review/time: 1100131200
review/summary: Worth it: mostly
review/text: Second review
";

    fn parse_all(input: &str) -> (Vec<RawRecord>, u64) {
        let mut parser = RecordParser::new(Cursor::new(input.as_bytes().to_vec()));
        let records: Vec<RawRecord> = parser.by_ref().map(|r| r.unwrap()).collect();
        (records, parser.skipped_lines())
    }

    #[test]
    fn test_parses_records_in_order() {
        let (records, skipped) = parse_all(TWO_REVIEWS);
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 0);
        assert_eq!(records[0].get(fields::PRODUCT_ID), Some("B00002066I"));
        assert_eq!(records[0].line, 1);
        assert_eq!(records[1].get(fields::PRODUCT_ID), Some("B000058A81"));
        assert_eq!(records[1].line, 9);
    }

    #[test]
    fn test_value_keeps_later_separators() {
        let (records, _) = parse_all(TWO_REVIEWS);
        assert_eq!(records[1].get(fields::SUMMARY), Some("Worth it: mostly"));
    }

    #[test]
    fn test_trailing_record_without_blank_line() {
        let input = "product/productId: P1\nreview/userId: U1";
        let (records, _) = parse_all(input);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(fields::USER_ID), Some("U1"));
    }

    #[test]
    fn test_malformed_and_unknown_lines_are_counted() {
        let input = "\
product/productId: P1
this line has no separator
review/favoriteColor: blue
review/userId: U1
";
        let (records, skipped) = parse_all(input);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 2);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_multiple_blank_lines_and_empty_input() {
        let (records, _) = parse_all("\n\n\nproduct/productId: P1\n\n\n\nproduct/productId: P2\n\n");
        assert_eq!(records.len(), 2);

        let (records, skipped) = parse_all("");
        assert!(records.is_empty());
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_block_of_only_garbage_is_not_a_record() {
        let (records, skipped) = parse_all("garbage\nmore garbage\n\nproduct/productId: P1\n");
        assert_eq!(records.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_bare_field_yields_empty_value() {
        let (records, skipped) = parse_all("product/productId: P1\nreview/summary:\n");
        assert_eq!(skipped, 0);
        assert_eq!(records[0].get(fields::SUMMARY), Some(""));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut bytes = b"product/productId: P1\nreview/text: caf".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        bytes.extend_from_slice(b"\n");
        let mut parser = RecordParser::new(Cursor::new(bytes));
        let record = parser.next().unwrap().unwrap();
        assert!(record.get(fields::TEXT).unwrap().starts_with("caf"));
    }

    #[test]
    fn test_source_reopens_from_start_plain_and_gzip() {
        let dir = std::env::temp_dir();
        let plain = dir.join(format!("review-loader-parser-{}.txt", std::process::id()));
        let gz = dir.join(format!("review-loader-parser-{}.txt.gz", std::process::id()));
        std::fs::write(&plain, TWO_REVIEWS).unwrap();
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::fast());
        encoder.write_all(TWO_REVIEWS.as_bytes()).unwrap();
        encoder.finish().unwrap();

        for path in [&plain, &gz] {
            let source = ReviewSource::new(path);
            let first: Vec<_> = source.open().unwrap().map(|r| r.unwrap()).collect();
            let second: Vec<_> = source.open().unwrap().map(|r| r.unwrap()).collect();
            assert_eq!(first.len(), 2);
            assert_eq!(first, second);
        }
        assert!(ReviewSource::new(&gz).is_gzip());
        assert!(!ReviewSource::new(&plain).is_gzip());

        let _ = std::fs::remove_file(plain);
        let _ = std::fs::remove_file(gz);
    }

    #[test]
    fn test_open_missing_file_errors() {
        let source = ReviewSource::new("/definitely/not/here.txt");
        assert!(source.open().is_err());
    }
}
