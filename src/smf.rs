//! Chunk framing and the `MidiFile` aggregate.
//!
//! A Standard MIDI File is a sequence of chunks, each one a 4-byte ASCII
//! identifier, a big-endian `u32` payload length and exactly that many
//! payload bytes. The `MThd` header chunk must come first; every `MTrk`
//! chunk after it carries one running-status event stream. Chunks with any
//! other identifier are vendor extensions and are skipped over using their
//! declared length.

use crate::{event::Event, prelude::*, primitive::{Division, Format}, stream};
use log::{debug, warn};
use std::{fs, io, path::Path, slice};

const HEADER_MAGIC: [u8; 4] = *b"MThd";
const TRACK_MAGIC: [u8; 4] = *b"MTrk";

/// How many payload bytes a file must have before decoding and encoding
/// fan out to one job per track.
#[cfg(feature = "parallel")]
const PARALLEL_ENABLE_THRESHOLD: usize = 3 * 1024;

/// How forgiving decoding is about spec violations.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Strictness {
    /// Reject uncompliant input with a typed error.
    Strict,
    /// Salvage whatever decodes cleanly, logging what was thrown away.
    ///
    /// The recoveries are: clamping chunks whose declared length overruns
    /// the file, ignoring trailing bytes that form no chunk or follow an
    /// end-of-track event, closing tracks cut off mid-stream, accepting a
    /// wrong declared track count and ignoring duplicate header chunks.
    Lenient,
}

/// Options controlling the decode path.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DecodeOptions {
    strictness: Strictness,
}
impl Default for DecodeOptions {
    #[inline]
    fn default() -> DecodeOptions {
        DecodeOptions {
            strictness: Strictness::Strict,
        }
    }
}
impl DecodeOptions {
    /// Strict decoding, the default.
    #[inline]
    pub fn new() -> DecodeOptions {
        DecodeOptions::default()
    }

    /// Lenient decoding.
    #[inline]
    pub fn lenient() -> DecodeOptions {
        DecodeOptions::new().strictness(Strictness::Lenient)
    }

    /// Use the given strictness.
    #[inline]
    pub fn strictness(mut self, strictness: Strictness) -> DecodeOptions {
        self.strictness = strictness;
        self
    }

    #[inline]
    fn is_strict(&self) -> bool {
        self.strictness == Strictness::Strict
    }
}

/// A single track: an owned, ordered sequence of events.
///
/// In a well-formed track the last event is the end-of-track meta event and
/// no event before it is one. Decoding always yields tracks in this shape,
/// and encoding repairs tracks that are not.
#[derive(Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct Track {
    /// The events of this track, in file order.
    pub events: Vec<Event>,
}
impl Track {
    /// Create a track from a list of events.
    #[inline]
    pub fn new(events: Vec<Event>) -> Track {
        Track { events }
    }

    /// The number of events in this track.
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether this track has no events at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append an event.
    #[inline]
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Iterate over the events. The iterator is restartable: calling this
    /// again yields a fresh pass over the same storage.
    #[inline]
    pub fn iter(&self) -> slice::Iter<Event> {
        self.events.iter()
    }

    /// The tick position of the last event, counted from the track start.
    pub fn total_ticks(&self) -> u64 {
        self.events
            .iter()
            .map(|event| u64::from(event.delta.as_int()))
            .sum()
    }

    /// Decode a track from the raw payload of an `MTrk` chunk, strictly.
    pub fn decode(raw: &[u8]) -> Result<Track> {
        Track::decode_with(raw, DecodeOptions::default())
    }

    /// Decode a track from the raw payload of an `MTrk` chunk.
    pub fn decode_with(raw: &[u8], options: DecodeOptions) -> Result<Track> {
        Ok(Track::new(stream::decode_events(raw, 0, options.strictness)?))
    }

    /// Encode this track's event stream (without chunk framing) into `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        stream::encode_events(&self.events, out)?;
        Ok(())
    }
}
impl IntoIterator for Track {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}
impl<'a> IntoIterator for &'a Track {
    type Item = &'a Event;
    type IntoIter = slice::Iter<'a, Event>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
impl<'a> IntoIterator for &'a mut Track {
    type Item = &'a mut Event;
    type IntoIter = slice::IterMut<'a, Event>;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.events.iter_mut()
    }
}

/// An in-memory Standard MIDI File: the header fields plus the ordered list
/// of tracks.
///
/// This is the entry point of the crate. Parse with
/// [`from_bytes`](#method.from_bytes)/[`from_file`](#method.from_file),
/// write back with [`to_bytes`](#method.to_bytes)/[`to_file`](#method.to_file),
/// or build programmatically with [`new`](#method.new).
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct MidiFile {
    format: Format,
    division: Division,
    tracks: Vec<Track>,
}
impl MidiFile {
    /// Build a file from parts.
    ///
    /// Fails with [`ErrorKind::TrackCountMismatch`](enum.ErrorKind.html) if
    /// `format` is [`Format::Single`](enum.Format.html) and there is not
    /// exactly one track.
    pub fn new(format: Format, division: Division, tracks: Vec<Track>) -> Result<MidiFile> {
        ensure!(
            format != Format::Single || tracks.len() == 1,
            ErrorKind::TrackCountMismatch {
                declared: 1,
                found: tracks.len(),
            }
        );
        Ok(MidiFile {
            format,
            division,
            tracks,
        })
    }

    /// The track organization declared by the header.
    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    /// The meaning of a tick, as declared by the header.
    #[inline]
    pub fn division(&self) -> Division {
        self.division
    }

    /// The tracks of this file, in order.
    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Mutable access to the track list.
    #[inline]
    pub fn tracks_mut(&mut self) -> &mut Vec<Track> {
        &mut self.tracks
    }

    /// Decode a file from its raw bytes, strictly.
    pub fn from_bytes(raw: &[u8]) -> Result<MidiFile> {
        parse(raw, DecodeOptions::default())
    }

    /// Decode a file from its raw bytes with the given options.
    pub fn from_bytes_with(raw: &[u8], options: DecodeOptions) -> Result<MidiFile> {
        parse(raw, options)
    }

    /// Load and decode the file at `path`, strictly.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<MidiFile> {
        MidiFile::from_file_with(path, DecodeOptions::default())
    }

    /// Load and decode the file at `path` with the given options.
    pub fn from_file_with<P: AsRef<Path>>(path: P, options: DecodeOptions) -> Result<MidiFile> {
        fn load_impl(path: &Path, options: DecodeOptions) -> Result<MidiFile> {
            parse(&fs::read(path)?, options)
        }
        load_impl(path.as_ref(), options)
    }

    /// Encode the file to an in-memory byte buffer.
    ///
    /// Decoding the result reproduces `self`, and for files that came out of
    /// strict decoding the bytes equal the original input.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let events: usize = self.tracks.iter().map(Track::len).sum();
        let mut out = Vec::with_capacity(14 + self.tracks.len() * 8 + events * 4);
        self.write(&mut out)?;
        Ok(out)
    }

    /// Encode and write the file into the given writer.
    pub fn write<W: io::Write>(&self, out: &mut W) -> Result<()> {
        ensure!(
            self.format != Format::Single || self.tracks.len() == 1,
            ErrorKind::TrackCountMismatch {
                declared: 1,
                found: self.tracks.len(),
            }
        );
        let track_count = u16::try_from(self.tracks.len())
            .map_err(|_| ErrorKind::ValueOutOfRange("track count exceeds 16 bits"))?;
        let mut header = [0; 14];
        header[0..4].copy_from_slice(&HEADER_MAGIC);
        header[4..8].copy_from_slice(&6u32.to_be_bytes());
        header[8..10].copy_from_slice(&self.format.encode());
        header[10..12].copy_from_slice(&track_count.to_be_bytes());
        header[12..14].copy_from_slice(&self.division.encode());
        out.write_all(&header)?;
        for chunk in encode_track_chunks(&self.tracks)? {
            out.write_all(&chunk)?;
        }
        Ok(())
    }

    /// Encode and save the file to `path`.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fn save_impl(midi: &MidiFile, path: &Path) -> Result<()> {
            midi.write(&mut fs::File::create(path)?)
        }
        save_impl(self, path.as_ref())
    }
}

fn parse(raw: &[u8], options: DecodeOptions) -> Result<MidiFile> {
    let mut chunks = ChunkIter::new(raw, options);
    let header = match chunks.next() {
        Some(chunk) => chunk?,
        None => bail!(ErrorKind::TruncatedTrack("empty input, expected an MThd chunk")),
    };
    ensure!(
        header.id == HEADER_MAGIC,
        Error::from(ErrorKind::ChunkMagicMismatch {
            expected: HEADER_MAGIC,
            found: header.id,
        })
        .at(header.offset)
    );
    let (format, declared_tracks, division) = read_header(header.data).at(header.offset + 8)?;

    let mut track_chunks = Vec::with_capacity(declared_tracks as usize);
    for chunk in chunks {
        let chunk = chunk?;
        if chunk.id == TRACK_MAGIC {
            track_chunks.push(chunk);
        } else if chunk.id == HEADER_MAGIC {
            ensure!(
                !options.is_strict(),
                Error::from(ErrorKind::ChunkMagicMismatch {
                    expected: TRACK_MAGIC,
                    found: chunk.id,
                })
                .at(chunk.offset)
            );
            warn!("ignoring duplicate MThd chunk at byte {}", chunk.offset);
        } else {
            // Vendor extension chunks are skipped using their declared
            // length and not retained.
            debug!(
                "skipping unknown chunk `{}` ({} bytes) at byte {}",
                String::from_utf8_lossy(&chunk.id),
                chunk.data.len(),
                chunk.offset
            );
        }
    }

    if track_chunks.len() != declared_tracks as usize {
        ensure!(
            !options.is_strict(),
            ErrorKind::TrackCountMismatch {
                declared: declared_tracks,
                found: track_chunks.len(),
            }
        );
        warn!(
            "header declares {} tracks but {} were found",
            declared_tracks,
            track_chunks.len()
        );
    }

    let tracks = decode_tracks(&track_chunks, options)?;

    if format == Format::Single && tracks.len() != 1 {
        ensure!(
            !options.is_strict(),
            ErrorKind::TrackCountMismatch {
                declared: 1,
                found: tracks.len(),
            }
        );
        warn!("single-track format file carries {} tracks", tracks.len());
    }

    Ok(MidiFile {
        format,
        division,
        tracks,
    })
}

/// Read the fixed fields of the `MThd` payload. Payloads longer than 6
/// bytes are legal per the SMF spec; the excess is ignored.
fn read_header(mut data: &[u8]) -> StdResult<(Format, u16, Division), ErrorKind> {
    let format = Format::read(&mut data)?;
    let declared_tracks = u16::read(&mut data)?;
    let division = Division::read(&mut data)?;
    Ok((format, declared_tracks, division))
}

/// Decode every track chunk, one rayon job per track for large files.
///
/// Track chunks are fully independent byte regions, so no state is shared
/// between jobs beyond the immutable source buffer.
fn decode_tracks(chunks: &[RawChunk], options: DecodeOptions) -> Result<Vec<Track>> {
    let decode_one = |(index, chunk): (usize, &RawChunk)| -> Result<Track> {
        let events = stream::decode_events(chunk.data, chunk.offset + 8, options.strictness)
            .in_track(index)?;
        Ok(Track::new(events))
    };

    #[cfg(feature = "parallel")]
    {
        let body: usize = chunks.iter().map(|chunk| chunk.data.len()).sum();
        if body > PARALLEL_ENABLE_THRESHOLD {
            use rayon::prelude::*;
            return chunks.par_iter().enumerate().map(decode_one).collect();
        }
    }

    chunks.iter().enumerate().map(decode_one).collect()
}

/// Encode every track into its own framed chunk buffer, in parallel when
/// the file is large enough to make it worth it. Assembly into the final
/// byte stream stays sequential to respect chunk order.
fn encode_track_chunks(tracks: &[Track]) -> Result<Vec<Vec<u8>>> {
    let encode_one = |(index, track): (usize, &Track)| -> Result<Vec<u8>> {
        encode_track_chunk(track).in_track(index)
    };

    #[cfg(feature = "parallel")]
    {
        let events: usize = tracks.iter().map(Track::len).sum();
        if events * 4 > PARALLEL_ENABLE_THRESHOLD {
            use rayon::prelude::*;
            return tracks.par_iter().enumerate().map(encode_one).collect();
        }
    }

    tracks.iter().enumerate().map(encode_one).collect()
}

fn encode_track_chunk(track: &Track) -> StdResult<Vec<u8>, ErrorKind> {
    let mut out = Vec::with_capacity(8 + track.len() * 4);
    out.extend_from_slice(b"MTrk\0\0\0\0");
    stream::encode_events(&track.events, &mut out)?;
    let length = u32::try_from(out.len() - 8)
        .map_err(|_| ErrorKind::ValueOutOfRange("track chunk length exceeds 32 bits"))?;
    out[4..8].copy_from_slice(&length.to_be_bytes());
    Ok(out)
}

/// A chunk as framed in the file, before its payload is interpreted.
struct RawChunk<'a> {
    id: [u8; 4],
    data: &'a [u8],
    /// Offset of the chunk (its identifier) from the start of the file.
    offset: usize,
}

struct ChunkIter<'a> {
    /// Starts at the current position, ends at EOF.
    raw: &'a [u8],
    full_len: usize,
    options: DecodeOptions,
}
impl<'a> ChunkIter<'a> {
    fn new(raw: &'a [u8], options: DecodeOptions) -> ChunkIter<'a> {
        ChunkIter {
            raw,
            full_len: raw.len(),
            options,
        }
    }
}
impl<'a> Iterator for ChunkIter<'a> {
    type Item = Result<RawChunk<'a>>;
    fn next(&mut self) -> Option<Result<RawChunk<'a>>> {
        if self.raw.is_empty() {
            return None;
        }
        let offset = self.full_len - self.raw.len();
        if self.raw.len() < 8 {
            let remaining = mem::replace(&mut self.raw, &[]).len();
            if self.options.is_strict() {
                return Some(Err(Error::from(ErrorKind::ChunkLengthMismatch {
                    declared: 8,
                    actual: remaining,
                })
                .at(offset)));
            }
            warn!(
                "ignoring {} trailing bytes that do not form a chunk",
                remaining
            );
            return None;
        }
        let mut id = [0; 4];
        id.copy_from_slice(&self.raw[..4]);
        let declared = u32::from_be_bytes([self.raw[4], self.raw[5], self.raw[6], self.raw[7]]);
        let mut rest = &self.raw[8..];
        let data = match rest.split_checked(declared as usize) {
            Some(data) => data,
            None => {
                if self.options.is_strict() {
                    // Ensure a poisoned iterator yields nothing further,
                    // rather than resyncing in the middle of a chunk.
                    let remaining = mem::replace(&mut self.raw, &[]).len() - 8;
                    return Some(Err(Error::from(ErrorKind::ChunkLengthMismatch {
                        declared,
                        actual: remaining,
                    })
                    .at(offset)));
                }
                warn!(
                    "chunk at byte {} declares {} bytes with only {} available, clamping",
                    offset,
                    declared,
                    rest.len()
                );
                mem::replace(&mut rest, &[])
            }
        };
        self.raw = rest;
        Some(Ok(RawChunk { id, data, offset }))
    }
}
