//! # Segment Buffer
//!
//! Accumulates record lines into one bounded transmission segment.
//!
//! The buffer allocates its storage once and is recycled for every segment of
//! a session: `append` until [`Append::SegmentFull`], `seal` to get a borrowed
//! view for the transfer, then `clear` to zero it for the next batch.
//!
//! ```
//! use radiometer_uplink::uplink::segment::{Append, Record, SegmentBuffer, SegmentLimits};
//!
//! let mut buffer = SegmentBuffer::new(SegmentLimits::default());
//! let record = Record::parse(b"12.5,13.1\r\n", 100).unwrap().unwrap();
//! assert_eq!(buffer.append(record).unwrap(), Append::Accepted);
//!
//! let segment = buffer.seal();
//! assert_eq!(segment.payload(), b"12.5,13.1\r\n");
//! buffer.clear();
//! assert!(buffer.is_empty());
//! ```

use bytes::BytesMut;
use std::fmt;

use crate::error::{Result, UplinkError};
use crate::storage::validate_filename;

/// Longest record accepted, line terminator included
pub const MAX_RECORD_LEN: usize = 100;

/// Records per transmitted segment
pub const MAX_RECORDS_PER_SEGMENT: usize = 5;

/// Terminator written after every record in a segment payload
pub const RECORD_TERMINATOR: &[u8] = b"\r\n";

/// Leading characters of the source filename kept in a segment name
pub const SEGMENT_STEM_LEN: usize = 8;

/// One line of measurement text, borrowed from the reader's line buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    text: &'a [u8],
}

impl<'a> Record<'a> {
    /// Parse a raw line as read from storage.
    ///
    /// Trailing `\r` and `\n` are stripped. Returns `Ok(None)` for a blank
    /// line.
    ///
    /// # Errors
    ///
    /// Returns [`UplinkError::RecordTooLong`] if the line plus its CRLF
    /// terminator is longer than `max_len`.
    pub fn parse(line: &'a [u8], max_len: usize) -> Result<Option<Self>> {
        let mut text = line;
        while let [rest @ .., b'\r' | b'\n'] = text {
            text = rest;
        }

        if text.is_empty() {
            return Ok(None);
        }

        let record = Self { text };
        if record.encoded_len() > max_len {
            return Err(UplinkError::RecordTooLong {
                len: record.encoded_len(),
                max: max_len,
            });
        }

        Ok(Some(record))
    }

    /// Line content without terminator
    pub fn text(&self) -> &'a [u8] {
        self.text
    }

    /// Bytes the record occupies inside a segment payload
    pub fn encoded_len(&self) -> usize {
        self.text.len() + RECORD_TERMINATOR.len()
    }
}

/// Capacity bounds of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLimits {
    pub max_records: usize,
    pub max_record_len: usize,
}

impl Default for SegmentLimits {
    fn default() -> Self {
        Self {
            max_records: MAX_RECORDS_PER_SEGMENT,
            max_record_len: MAX_RECORD_LEN,
        }
    }
}

impl SegmentLimits {
    /// Byte bound of a whole segment: one spare byte per record slot
    pub fn max_bytes(&self) -> usize {
        (self.max_record_len + 1) * self.max_records
    }
}

/// Outcome of [`SegmentBuffer::append`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// Record was copied into the segment
    Accepted,
    /// Nothing was written; seal, send and clear before retrying the same record
    SegmentFull,
}

/// Fixed-capacity, append-only record accumulator
#[derive(Debug)]
pub struct SegmentBuffer {
    data: BytesMut,
    /// Payload offset just past each record's terminator
    ends: Vec<usize>,
    limits: SegmentLimits,
    sealed: bool,
}

impl SegmentBuffer {
    /// Allocate a buffer sized for `limits`
    #[must_use]
    pub fn new(limits: SegmentLimits) -> Self {
        Self {
            data: BytesMut::with_capacity(limits.max_bytes()),
            ends: Vec::with_capacity(limits.max_records),
            limits,
            sealed: false,
        }
    }

    pub fn limits(&self) -> SegmentLimits {
        self.limits
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Copy `record` into the open segment.
    ///
    /// # Errors
    ///
    /// Returns [`UplinkError::BufferCapacityExceeded`] if the buffer is
    /// sealed. That is a caller defect, not a full segment.
    pub fn append(&mut self, record: Record<'_>) -> Result<Append> {
        if self.sealed {
            return Err(UplinkError::BufferCapacityExceeded(
                "append on a sealed segment before clear".to_string(),
            ));
        }

        if self.ends.len() >= self.limits.max_records
            || self.data.len() + record.encoded_len() > self.limits.max_bytes()
        {
            return Ok(Append::SegmentFull);
        }

        self.data.extend_from_slice(record.text());
        self.data.extend_from_slice(RECORD_TERMINATOR);
        self.ends.push(self.data.len());

        Ok(Append::Accepted)
    }

    /// Freeze the current contents and borrow them for transfer
    pub fn seal(&mut self) -> Segment<'_> {
        self.sealed = true;
        Segment {
            payload: &self.data,
            ends: &self.ends,
        }
    }

    /// Zero the contents and reopen the buffer, keeping its allocation
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.data.clear();
        self.ends.clear();
        self.sealed = false;
    }
}

/// Sealed view of a [`SegmentBuffer`]
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    payload: &'a [u8],
    ends: &'a [usize],
}

impl<'a> Segment<'a> {
    /// Bytes sent to the remote store
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Number of records in the segment
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// Record texts in append order, terminators removed
    pub fn records(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let payload = self.payload;
        let ends = self.ends;
        let starts = std::iter::once(0).chain(ends.iter().copied());
        starts
            .zip(ends.iter().copied())
            .map(move |(start, end)| &payload[start..end - RECORD_TERMINATOR.len()])
    }
}

/// Remote object name of one segment: `STEM.NNN`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentId {
    stem: String,
    sequence: u32,
}

impl SegmentId {
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.stem, self.sequence)
    }
}

/// Hands out the segment names of one source file in sequence
#[derive(Debug)]
pub struct SegmentNamer {
    stem: String,
    next: u32,
}

impl SegmentNamer {
    /// Namer for `filename`, starting at sequence 0
    ///
    /// # Errors
    ///
    /// Returns [`UplinkError::UnsupportedFilename`] if the name is not a valid
    /// 8.3 storage name.
    pub fn for_file(filename: &str) -> Result<Self> {
        validate_filename(filename)?;

        let stem = filename.chars().take(SEGMENT_STEM_LEN).collect();

        Ok(Self { stem, next: 0 })
    }

    /// Name for the next sealed segment
    pub fn next_id(&mut self) -> SegmentId {
        let id = SegmentId {
            stem: self.stem.clone(),
            sequence: self.next,
        };
        self.next += 1;
        id
    }
}
