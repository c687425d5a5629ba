//! # Overview
//!
//! `smfio` is a codec for Standard MIDI Files (`.mid`) and the MIDI 1.0
//! message set they carry: it decodes a byte stream into a typed, owned
//! [`MidiFile`](struct.MidiFile.html) of event tracks and encodes that
//! representation back to bytes, losslessly.
//!
//! Usage is as simple as:
//!
//! ```rust
//! use smfio::MidiFile;
//!
//! # fn main() -> smfio::Result<()> {
//! # let bytes = sample();
//! let midi = MidiFile::from_bytes(&bytes)?;
//!
//! for (i, track) in midi.tracks().iter().enumerate() {
//!     println!("track {} has {} events", i, track.len());
//! }
//! # assert_eq!(midi.to_bytes()?, bytes);
//! # Ok(())
//! # }
//! # fn sample() -> Vec<u8> {
//! #     let mut v = b"MThd\x00\x00\x00\x06\x00\x00\x00\x01\x00\x60".to_vec();
//! #     v.extend_from_slice(b"MTrk\x00\x00\x00\x0c");
//! #     v.extend_from_slice(&[0x00, 0x90, 0x3C, 0x64, 0x60, 0x80, 0x3C, 0x40, 0x00, 0xFF, 0x2F, 0x00]);
//! #     v
//! # }
//! ```
//!
//! Files can also be built programmatically and saved:
//!
//! ```rust
//! use smfio::{
//!     num::*, ChannelMessage, Division, Event, Format, Message, MetaMessage, MidiFile, Track,
//! };
//!
//! # fn main() -> smfio::Result<()> {
//! let mut track = Track::default();
//! track.push(Event::new(0, Message::Meta(MetaMessage::Tempo(u24::new(500_000)))));
//! track.push(Event::new(
//!     0,
//!     Message::Channel {
//!         channel: u4::new(0),
//!         message: ChannelMessage::NoteOn {
//!             key: u7::new(60),
//!             vel: u7::new(100),
//!         },
//!     },
//! ));
//! track.push(Event::new(96, Message::Meta(MetaMessage::EndOfTrack)));
//!
//! let midi = MidiFile::new(
//!     Format::Single,
//!     Division::TicksPerQuarter(u15::new(96)),
//!     vec![track],
//! )?;
//! let bytes = midi.to_bytes()?;
//! assert_eq!(MidiFile::from_bytes(&bytes)?, midi);
//! # Ok(())
//! # }
//! ```
//!
//! # Strict and lenient decoding
//!
//! By default decoding is strict: uncompliant input is rejected with a typed
//! [`Error`](struct.Error.html) carrying the byte offset and track index of
//! the failure. Passing [`DecodeOptions::lenient()`](struct.DecodeOptions.html)
//! to the `*_with` constructors instead salvages whatever decodes cleanly,
//! logging what was thrown away through the `log` crate. The documented
//! tolerances (unknown meta event types, unknown chunk types) are never
//! errors in either mode.
//!
//! # Timing
//!
//! Tick timestamps are converted to wall-clock seconds through a
//! [`TempoMap`](struct.TempoMap.html), built from the set-tempo meta events
//! of a chosen track (conventionally track 0).
//!
//! # Parallelism
//!
//! With the default `parallel` feature, large files decode and encode with
//! one job per track, since track chunks are fully independent byte regions.

macro_rules! bail {
    ($err:expr) => {{
        return Err($err.into());
    }};
}
macro_rules! ensure {
    ($cond:expr, $err:expr) => {{
        if !$cond {
            bail!($err)
        }
    }};
}

mod prelude {
    pub(crate) use crate::{
        error::{Error, ErrorKind, Result, ResultExt, StdResult},
        primitive::{u14, u15, u24, u28, u4, u7, IntRead, SplitChecked},
    };
    pub(crate) use std::{convert::TryFrom, fmt, mem};
}

mod error;
mod event;
mod message;
mod primitive;
mod smf;
mod stream;
mod tempo;
pub mod vlq;

pub use crate::{
    error::{Error, ErrorKind, Result},
    event::Event,
    message::{
        ChannelMessage, Message, MetaMessage, ModeMessage, MtcKind, PitchBend, SystemCommon,
        SystemRealtime,
    },
    primitive::{Division, Format, Fps, SmpteTime},
    smf::{DecodeOptions, MidiFile, Strictness, Track},
    tempo::{bpm_to_tempo, tempo_to_bpm, TempoMap, DEFAULT_TEMPO},
};

/// Exotically-sized integers used by the MIDI standard.
pub mod num {
    pub use crate::primitive::{u14, u15, u24, u28, u4, u7};
}
