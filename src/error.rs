//! All of the errors this crate produces.

use std::{fmt, io};
use thiserror::Error;

/// The result type used by the codec.
pub type Result<T> = StdResult<T, Error>;
pub(crate) use std::result::Result as StdResult;

/// An error raised while decoding or encoding Standard MIDI File data.
///
/// Wraps an [`ErrorKind`](enum.ErrorKind.html) together with the byte offset
/// and track index where the failure happened, when they are known. Offsets
/// are relative to the start of the decoded buffer.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    offset: Option<usize>,
    track: Option<usize>,
}
impl Error {
    /// What went wrong.
    #[inline]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The byte offset of the failure, if known.
    #[inline]
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// The index of the track where the failure happened, if any.
    #[inline]
    pub fn track(&self) -> Option<usize> {
        self.track
    }

    /// Attach a byte offset, keeping an already-attached (more precise) one.
    pub(crate) fn at(mut self, offset: usize) -> Error {
        self.offset.get_or_insert(offset);
        self
    }

    /// Attach a track index, keeping an already-attached one.
    pub(crate) fn in_track(mut self, track: usize) -> Error {
        self.track.get_or_insert(track);
        self
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)?;
        match (self.offset, self.track) {
            (Some(offset), Some(track)) => write!(f, " (byte {}, track {})", offset, track),
            (Some(offset), None) => write!(f, " (byte {})", offset),
            (None, Some(track)) => write!(f, " (track {})", track),
            (None, None) => Ok(()),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}
impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Error {
        Error {
            kind,
            offset: None,
            track: None,
        }
    }
}
impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Error {
        Error::from(ErrorKind::from(err))
    }
}

/// The kind of decode or encode failure, without positional context.
///
/// The documented tolerances (unknown meta event types, unknown chunk types,
/// and the lenient-mode recoveries) never surface here: they are handled
/// in-band and at most logged.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A variable-length quantity carried a continuation flag through all
    /// four of its permitted bytes.
    #[error("malformed variable-length quantity: no terminator within 4 bytes")]
    MalformedVlq,
    /// A value does not fit the range its encoding allows, or a data byte had
    /// its top bit set where only 7-bit data is legal.
    #[error("value out of range: {0}")]
    ValueOutOfRange(&'static str),
    /// A chunk identifier did not match the one required at its position.
    #[error("chunk magic mismatch: expected `{}`, found `{}`", fourcc(.expected), fourcc(.found))]
    ChunkMagicMismatch {
        /// The identifier required at this position.
        expected: [u8; 4],
        /// The identifier actually present.
        found: [u8; 4],
    },
    /// A chunk's declared length disagrees with the bytes actually there.
    #[error("chunk length mismatch: expected {declared} bytes, found {actual}")]
    ChunkLengthMismatch {
        /// The length the chunk header declares.
        declared: u32,
        /// The usable byte count found instead.
        actual: usize,
    },
    /// The number of tracks found differs from the declared count.
    #[error("track count mismatch: expected {declared} tracks, found {found}")]
    TrackCountMismatch {
        /// The count the header (or the format invariant) requires.
        declared: u16,
        /// The number of tracks actually present.
        found: usize,
    },
    /// The byte stream ended in the middle of an event, or a track stream
    /// ended without an end-of-track meta event.
    #[error("truncated track: {0}")]
    TruncatedTrack(&'static str),
    /// The header carries a format value outside `0..=2`.
    #[error("unsupported format {0}, expected 0, 1 or 2")]
    UnsupportedFormat(u16),
    /// A data byte appeared where a status byte was required, with no running
    /// status in effect to resolve it.
    #[error("data byte with neither a status byte nor a running status")]
    InvalidRunningStatus,
    /// The timing division is zero or otherwise unusable for time conversion.
    #[error("division info is missing or zero")]
    NoDivisionInfo,
    /// An underlying I/O failure while loading or saving a file.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

fn fourcc(id: &[u8; 4]) -> String {
    id.iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect()
}

pub(crate) trait ResultExt<T> {
    fn at(self, offset: usize) -> Result<T>;
    fn in_track(self, track: usize) -> Result<T>;
}
impl<T, E: Into<Error>> ResultExt<T> for StdResult<T, E> {
    #[inline]
    fn at(self, offset: usize) -> Result<T> {
        self.map_err(|err| err.into().at(offset))
    }
    #[inline]
    fn in_track(self, track: usize) -> Result<T> {
        self.map_err(|err| err.into().in_track(track))
    }
}
