// src/ingest.rs

use crate::error::PipelineError;
use csv::{ByteRecord, ReaderBuilder, Trim};
use log::{debug, trace, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// One `(user, item, rating)` observation.
///
/// Indices are signed so that negative values in the input parse and can be
/// rejected by the bounds check of the matrix builder.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RatingTriple {
    pub user: i64,
    pub item: i64,
    pub rating: f64,
}

/// Counters collected while streaming a ratings file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Records seen after the header line.
    pub records_seen: u64,
    /// Records that parsed as a triple and were handed to the consumer.
    pub triples_parsed: u64,
    /// Records with any other shape. These are skipped, not reported.
    pub lines_skipped: u64,
}

/// Streams rating triples out of a `user,item,rating` CSV file.
///
/// The first line is always discarded as a header. Every later line that is
/// not exactly two integers and a real number is skipped silently. The file is
/// read in one forward pass: [`CsvIngestor::for_each_triple`] consumes the
/// ingestor, and reading again means opening the file again.
pub struct CsvIngestor<R: Read = File> {
    reader: csv::Reader<BufReader<R>>,
    source: PathBuf,
    header_present: bool,
}

impl CsvIngestor<File> {
    /// Opens `path` and discards its first line.
    ///
    /// # Errors
    /// Returns [`PipelineError::Io`] if the file is missing or unreadable.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_reader(file, path)
    }
}

impl<R: Read> CsvIngestor<R> {
    /// Wraps an arbitrary byte source. `source` is only used in error messages.
    pub fn from_reader<P: Into<PathBuf>>(inner: R, source: P) -> Result<Self, PipelineError> {
        let source = source.into();
        let mut buffered = BufReader::new(inner);

        // The header is dropped unread, whatever it contains.
        let mut header = Vec::new();
        let header_len = buffered
            .read_until(b'\n', &mut header)
            .map_err(|e| PipelineError::io(&source, e))?;
        if header_len == 0 {
            warn!("Ratings file {:?} is empty; no triples will be read.", source);
        }

        // Quotes are plain bytes: a stray `"` must not join the following lines.
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .trim(Trim::All)
            .from_reader(buffered);

        Ok(Self {
            reader,
            source,
            header_present: header_len > 0,
        })
    }

    /// Whether the input had a first line to discard.
    pub fn header_present(&self) -> bool {
        self.header_present
    }

    /// Parses every remaining line and hands each well-formed triple to `consumer`,
    /// in file order.
    ///
    /// # Errors
    /// Only a failure of the underlying reader is an error. Malformed lines are
    /// counted in [`IngestStats::lines_skipped`].
    pub fn for_each_triple<F>(mut self, mut consumer: F) -> Result<IngestStats, PipelineError>
    where
        F: FnMut(RatingTriple),
    {
        let mut stats = IngestStats::default();
        let mut record = ByteRecord::new();

        loop {
            match self.reader.read_byte_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    stats.records_seen += 1;
                    match parse_triple(&record) {
                        Some(triple) => {
                            stats.triples_parsed += 1;
                            consumer(triple);
                        }
                        None => {
                            stats.lines_skipped += 1;
                            trace!("Skipping malformed record {}", stats.records_seen);
                        }
                    }
                }
                Err(e) => match e.into_kind() {
                    csv::ErrorKind::Io(io_error) => {
                        return Err(PipelineError::io(&self.source, io_error));
                    }
                    // Anything else is a malformed line.
                    _ => {
                        stats.records_seen += 1;
                        stats.lines_skipped += 1;
                    }
                },
            }
        }

        debug!(
            "Read {} records from {:?}: {} triples, {} skipped.",
            stats.records_seen, self.source, stats.triples_parsed, stats.lines_skipped
        );
        Ok(stats)
    }
}

/// Parses one record as `<integer>,<integer>,<real>`.
///
/// Returns `None` for any other shape, including records with more or fewer
/// than three fields.
pub fn parse_triple(record: &ByteRecord) -> Option<RatingTriple> {
    if record.len() != 3 {
        return None;
    }
    let user = parse_field::<i64>(record.get(0)?)?;
    let item = parse_field::<i64>(record.get(1)?)?;
    let rating = parse_field::<f64>(record.get(2)?)?;
    Some(RatingTriple { user, item, rating })
}

fn parse_field<T: std::str::FromStr>(field: &[u8]) -> Option<T> {
    std::str::from_utf8(field).ok()?.parse::<T>().ok()
}
