//! The MIDI message model: every message kind with its exact payload shape,
//! and the single-message byte codec with its running-status rules.

use crate::{prelude::*, primitive::SmpteTime, vlq};

/// A single MIDI message, as carried by an SMF track stream.
///
/// This is a closed type: every message the codec can decode is one of these
/// variants, and encoding is defined for all of them, so exhaustiveness of
/// both directions is checked at compile time.
///
/// The groups follow the MIDI 1.0 specification:
///
/// - `Channel`: channel voice messages, the bulk of most files.
/// - `Mode`: channel mode messages, a semantically distinct subset of
///   controller changes (controllers 120 to 127).
/// - `Common` and `Realtime`: system messages.
/// - `Meta`: SMF-only metadata events, never legal in raw wire traffic.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub enum Message {
    /// A channel voice message carrying musical data.
    Channel {
        /// The MIDI channel this message is associated with.
        channel: u4,
        /// The message type and its data bytes.
        message: ChannelMessage,
    },
    /// A channel mode message (controller numbers 120 to 127).
    ///
    /// Only the canonical payloads decode into this variant; a mode
    /// controller with a non-canonical value byte stays a plain
    /// [`ChannelMessage::Controller`](enum.ChannelMessage.html), so that
    /// whatever was read re-encodes byte-identically.
    Mode {
        /// The MIDI channel this message is associated with.
        channel: u4,
        /// The mode change requested.
        message: ModeMessage,
    },
    /// A System Common message.
    Common(SystemCommon),
    /// A System Realtime message: a single status byte, no data.
    Realtime(SystemRealtime),
    /// A meta event, giving extra information for correct playback: tempo,
    /// track names, lyrics, the end-of-track marker, etc.
    Meta(MetaMessage),
}
impl Message {
    /// The status byte this message encodes with when written without a
    /// running status in effect.
    pub fn status(&self) -> u8 {
        match self {
            Message::Channel { channel, message } => {
                message.status_nibble() << 4 | channel.as_int()
            }
            Message::Mode { channel, .. } => 0xB0 | channel.as_int(),
            Message::Common(common) => common.status(),
            Message::Realtime(realtime) => realtime.status(),
            Message::Meta(_) => 0xFF,
        }
    }

    /// Decode a single message from the start of `bytes`.
    ///
    /// If the first byte has its high bit clear it is treated as the first
    /// data byte of a repeated channel message under `running_status`; with
    /// no running status in effect this fails with
    /// [`ErrorKind::InvalidRunningStatus`](enum.ErrorKind.html).
    ///
    /// Returns the message, the number of bytes consumed and the running
    /// status after this message.
    pub fn decode(
        bytes: &[u8],
        running_status: Option<u8>,
    ) -> Result<(Message, usize, Option<u8>)> {
        let mut raw = bytes;
        let mut status = running_status;
        let message = Message::read(&mut raw, &mut status)?;
        Ok((message, bytes.len() - raw.len(), status))
    }

    /// Encode this message to `out`, omitting the status byte if the message
    /// is a channel voice/mode message and its status equals
    /// `running_status`.
    ///
    /// Returns the running status after this message: channel voice/mode
    /// messages set it, everything else clears it.
    pub fn encode(&self, running_status: Option<u8>, out: &mut Vec<u8>) -> Result<Option<u8>> {
        let mut status = running_status;
        self.write(&mut status, out)?;
        Ok(status)
    }

    /// Advances the cursor and updates `running_status`.
    ///
    /// In case of failure the cursor may be left in the middle of a message.
    pub(crate) fn read(
        raw: &mut &[u8],
        running_status: &mut Option<u8>,
    ) -> StdResult<Message, ErrorKind> {
        let mut status = *raw
            .get(0)
            .ok_or(ErrorKind::TruncatedTrack("eof where a message was expected"))?;
        if status < 0x80 {
            // Running status: the byte is data, the status is implicit.
            status = running_status.ok_or(ErrorKind::InvalidRunningStatus)?;
        } else {
            *raw = &raw[1..];
        }
        Ok(match status {
            0x80..=0xEF => {
                *running_status = Some(status);
                let channel = u4::new(status);
                let message = ChannelMessage::read(status, raw)?;
                match message {
                    ChannelMessage::Controller { controller, value }
                        if controller.as_int() >= 120 =>
                    {
                        match ModeMessage::from_controller(controller, value) {
                            Some(mode) => Message::Mode {
                                channel,
                                message: mode,
                            },
                            None => Message::Channel { channel, message },
                        }
                    }
                    _ => Message::Channel { channel, message },
                }
            }
            0xF0..=0xF6 => {
                *running_status = None;
                Message::Common(SystemCommon::read(status, raw)?)
            }
            0xF7 => {
                *running_status = None;
                return Err(ErrorKind::ValueOutOfRange("stray end-of-exclusive status"));
            }
            0xF8..=0xFE => {
                *running_status = None;
                Message::Realtime(
                    SystemRealtime::from_status(status)
                        .ok_or(ErrorKind::ValueOutOfRange("undefined system realtime status"))?,
                )
            }
            0xFF => {
                *running_status = None;
                Message::Meta(MetaMessage::read(raw)?)
            }
            0x00..=0x7F => unreachable!("running status resolved above"),
        })
    }

    /// Write a single message, maintaining the running status across calls.
    ///
    /// Running status rules:
    /// - channel voice/mode messages (`0x80..=0xEF`) use and update it
    /// - system common, system realtime and meta messages clear it
    pub(crate) fn write(
        &self,
        running_status: &mut Option<u8>,
        out: &mut Vec<u8>,
    ) -> StdResult<(), ErrorKind> {
        match self {
            Message::Channel { message, .. } => {
                let status = self.status();
                if Some(status) != *running_status {
                    out.push(status);
                    *running_status = Some(status);
                }
                message.write(out);
            }
            Message::Mode { message, .. } => {
                let status = self.status();
                if Some(status) != *running_status {
                    out.push(status);
                    *running_status = Some(status);
                }
                let (controller, value) = message.to_controller();
                out.push(controller.as_int());
                out.push(value.as_int());
            }
            Message::Common(common) => {
                *running_status = None;
                common.write(out)?;
            }
            Message::Realtime(realtime) => {
                *running_status = None;
                out.push(realtime.status());
            }
            Message::Meta(meta) => {
                *running_status = None;
                out.push(0xFF);
                meta.write(out)?;
            }
        }
        Ok(())
    }
}

/// A channel voice message, associated to one of the 16 MIDI channels.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ChannelMessage {
    /// Stop playing a note.
    NoteOff {
        /// The MIDI key to stop playing.
        key: u7,
        /// The velocity with which to release it.
        vel: u7,
    },
    /// Start playing a note.
    ///
    /// Note that by convention a `NoteOn` with a velocity of 0 is equivalent
    /// to a `NoteOff`.
    NoteOn {
        /// The key to start playing.
        key: u7,
        /// The velocity (strength) with which to press it.
        vel: u7,
    },
    /// Modify the pressure of a single note after it has been played.
    Aftertouch {
        /// The key whose pressure changes.
        key: u7,
        /// The new pressure for the key.
        vel: u7,
    },
    /// Modify the value of a MIDI controller.
    ///
    /// Controller numbers 120 to 127 with their canonical values decode as
    /// [`Message::Mode`](enum.Message.html) instead.
    Controller {
        /// The controller to modify. See the MIDI spec for the meaning of
        /// each index.
        controller: u7,
        /// The value to set it to.
        value: u7,
    },
    /// Change the program (instrument) of a channel.
    ProgramChange {
        /// The new program to use.
        program: u7,
    },
    /// Modify the pressure of a whole channel at once.
    ChannelAftertouch {
        /// The new pressure for all notes currently playing in the channel.
        vel: u7,
    },
    /// Set the pitch bend value of the entire channel.
    PitchBend {
        /// The new pitch-bend value.
        bend: PitchBend,
    },
}
impl ChannelMessage {
    /// Channel messages have a known data length, selected by the status
    /// nibble.
    pub(crate) fn msg_length(status: u8) -> usize {
        const LENGTH_BY_STATUS: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2, 2, 1, 1, 2, 0];
        LENGTH_BY_STATUS[(status >> 4) as usize] as usize
    }

    /// Read the data bytes of a channel message whose status was already
    /// consumed.
    ///
    /// Panics if `status` is not a channel message status (`0x80..=0xEF`).
    fn read(status: u8, raw: &mut &[u8]) -> StdResult<ChannelMessage, ErrorKind> {
        let data = raw
            .split_checked(Self::msg_length(status))
            .ok_or(ErrorKind::TruncatedTrack("eof inside a channel message"))?;
        Ok(match status >> 4 {
            0x8 => ChannelMessage::NoteOff {
                key: u7::check_int(data[0])?,
                vel: u7::check_int(data[1])?,
            },
            0x9 => ChannelMessage::NoteOn {
                key: u7::check_int(data[0])?,
                vel: u7::check_int(data[1])?,
            },
            0xA => ChannelMessage::Aftertouch {
                key: u7::check_int(data[0])?,
                vel: u7::check_int(data[1])?,
            },
            0xB => ChannelMessage::Controller {
                controller: u7::check_int(data[0])?,
                value: u7::check_int(data[1])?,
            },
            0xC => ChannelMessage::ProgramChange {
                program: u7::check_int(data[0])?,
            },
            0xD => ChannelMessage::ChannelAftertouch {
                vel: u7::check_int(data[0])?,
            },
            0xE => {
                // Note the little-endian order, contrasting with the default
                // big-endian order of Standard MIDI Files.
                let lsb = u7::check_int(data[0])?.as_int() as u16;
                let msb = u7::check_int(data[1])?.as_int() as u16;
                ChannelMessage::PitchBend {
                    bend: PitchBend(u14::new(msb << 7 | lsb)),
                }
            }
            _ => panic!("parsed channel message before checking that status is in range"),
        })
    }

    /// The raw status nibble of this message type.
    pub(crate) fn status_nibble(&self) -> u8 {
        match self {
            ChannelMessage::NoteOff { .. } => 0x8,
            ChannelMessage::NoteOn { .. } => 0x9,
            ChannelMessage::Aftertouch { .. } => 0xA,
            ChannelMessage::Controller { .. } => 0xB,
            ChannelMessage::ProgramChange { .. } => 0xC,
            ChannelMessage::ChannelAftertouch { .. } => 0xD,
            ChannelMessage::PitchBend { .. } => 0xE,
        }
    }

    /// Write the data part of this message, not including the status.
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            ChannelMessage::NoteOff { key, vel } => {
                out.extend_from_slice(&[key.as_int(), vel.as_int()])
            }
            ChannelMessage::NoteOn { key, vel } => {
                out.extend_from_slice(&[key.as_int(), vel.as_int()])
            }
            ChannelMessage::Aftertouch { key, vel } => {
                out.extend_from_slice(&[key.as_int(), vel.as_int()])
            }
            ChannelMessage::Controller { controller, value } => {
                out.extend_from_slice(&[controller.as_int(), value.as_int()])
            }
            ChannelMessage::ProgramChange { program } => out.push(program.as_int()),
            ChannelMessage::ChannelAftertouch { vel } => out.push(vel.as_int()),
            ChannelMessage::PitchBend { bend } => {
                let raw = bend.0.as_int();
                out.extend_from_slice(&[(raw & 0x7F) as u8, (raw >> 7) as u8])
            }
        }
    }
}

/// A channel mode message: a controller change in the 120 to 127 range,
/// which switches how the receiving channel behaves rather than carrying
/// musical data.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ModeMessage {
    /// Controller 120: silence the channel immediately.
    AllSoundOff,
    /// Controller 121: reset all controllers to their default state.
    ResetAllControllers,
    /// Controller 122: connect (`true`) or disconnect (`false`) the local
    /// keyboard from the sound generator.
    LocalControl(bool),
    /// Controller 123: release all playing notes.
    AllNotesOff,
    /// Controller 124: respond only to the channel's own number.
    OmniOff,
    /// Controller 125: respond to all channels.
    OmniOn,
    /// Controller 126: monophonic mode, with the number of channels to use
    /// (`0` meaning "as many as the receiver supports").
    MonoMode(u7),
    /// Controller 127: polyphonic mode.
    PolyMode,
}
impl ModeMessage {
    /// Map a controller/value pair to a mode message, if the pair is the
    /// canonical encoding of one.
    pub(crate) fn from_controller(controller: u7, value: u7) -> Option<ModeMessage> {
        Some(match (controller.as_int(), value.as_int()) {
            (120, 0) => ModeMessage::AllSoundOff,
            (121, 0) => ModeMessage::ResetAllControllers,
            (122, 0) => ModeMessage::LocalControl(false),
            (122, 127) => ModeMessage::LocalControl(true),
            (123, 0) => ModeMessage::AllNotesOff,
            (124, 0) => ModeMessage::OmniOff,
            (125, 0) => ModeMessage::OmniOn,
            (126, channels) => ModeMessage::MonoMode(u7::new(channels)),
            (127, 0) => ModeMessage::PolyMode,
            _ => return None,
        })
    }

    /// The controller/value pair this mode message encodes as.
    pub fn to_controller(&self) -> (u7, u7) {
        let (controller, value) = match self {
            ModeMessage::AllSoundOff => (120, 0),
            ModeMessage::ResetAllControllers => (121, 0),
            ModeMessage::LocalControl(false) => (122, 0),
            ModeMessage::LocalControl(true) => (122, 127),
            ModeMessage::AllNotesOff => (123, 0),
            ModeMessage::OmniOff => (124, 0),
            ModeMessage::OmniOn => (125, 0),
            ModeMessage::MonoMode(channels) => (126, channels.as_int()),
            ModeMessage::PolyMode => (127, 0),
        };
        (u7::new(controller), u7::new(value))
    }
}

/// The value of a pitch bend, represented as 14 bits.
///
/// A value of `0x0000` indicates full bend downwards.
/// A value of `0x2000` indicates no bend.
/// A value of `0x3FFF` indicates full bend upwards.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct PitchBend(pub u14);
impl PitchBend {
    /// The middle value of `0x2000`, indicating no bend.
    #[inline]
    pub const fn mid_raw_value() -> PitchBend {
        PitchBend(u14::new(0x2000))
    }

    /// Create a `PitchBend` from an int in the range `[-0x2000, 0x1FFF]`.
    ///
    /// Integers outside this range are clamped.
    #[inline]
    pub fn from_int(int: i16) -> PitchBend {
        PitchBend(u14::new((int.max(-0x2000).min(0x1FFF) + 0x2000) as u16))
    }

    /// Returns an int in the range `[-0x2000, 0x1FFF]`.
    #[inline]
    pub fn as_int(self) -> i16 {
        self.0.as_int() as i16 - 0x2000
    }

    /// Create a `PitchBend` from a number in the range `[-1.0, 1.0)`.
    ///
    /// Floats outside this range are clamped.
    #[inline]
    pub fn from_f32(float: f32) -> PitchBend {
        PitchBend::from_int((float.max(-1.0).min(1.0) * 0x2000 as f32) as i16)
    }

    /// Returns an `f32` in the range `[-1.0, 1.0)`.
    #[inline]
    pub fn as_f32(self) -> f32 {
        self.as_int() as f32 * (1.0 / 0x2000 as f32)
    }
}

/// A System Common message, as defined by the MIDI spec.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub enum SystemCommon {
    /// A system exclusive dump: the bytes between the `0xF0` lead-in and the
    /// terminating `0xF7`, neither included.
    ///
    /// The payload is captured verbatim, continuation packets and
    /// manufacturer framing included; no reinterpretation is performed.
    SysEx(Vec<u8>),
    /// A single nibble of a MIDI Time Code Quarter Frame, carrying a tag
    /// type and a 4-bit tag value.
    MtcQuarterFrame(MtcKind, u4),
    /// The number of MIDI beats (6 MIDI clocks each) elapsed since the start
    /// of the song.
    SongPosition(u14),
    /// Select a given song index.
    SongSelect(u7),
    /// Request the device to tune itself.
    TuneRequest,
}
impl SystemCommon {
    fn read(status: u8, raw: &mut &[u8]) -> StdResult<SystemCommon, ErrorKind> {
        Ok(match status {
            0xF0 => {
                // Scan for the end-of-exclusive byte; everything before it is
                // raw payload.
                let end = raw.iter().position(|&byte| byte == 0xF7).ok_or(
                    ErrorKind::TruncatedTrack("sysex without an end-of-exclusive byte"),
                )?;
                let data = raw[..end].to_vec();
                *raw = &raw[end + 1..];
                SystemCommon::SysEx(data)
            }
            0xF1 => {
                let byte = u7::check_int(u8::read(raw)?)?.as_int();
                SystemCommon::MtcQuarterFrame(MtcKind::from_code(byte >> 4), u4::new(byte))
            }
            0xF2 => {
                let lsb = u7::check_int(u8::read(raw)?)?.as_int() as u16;
                let msb = u7::check_int(u8::read(raw)?)?.as_int() as u16;
                SystemCommon::SongPosition(u14::new(msb << 7 | lsb))
            }
            0xF3 => SystemCommon::SongSelect(u7::check_int(u8::read(raw)?)?),
            0xF6 => SystemCommon::TuneRequest,
            0xF4 | 0xF5 => {
                return Err(ErrorKind::ValueOutOfRange("undefined system common status"))
            }
            _ => panic!("parsed system common message with an out of range status"),
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> StdResult<(), ErrorKind> {
        match self {
            SystemCommon::SysEx(data) => {
                // An eighth bit inside the payload would break the
                // end-of-exclusive framing on the way back in.
                ensure!(
                    data.iter().all(|&byte| byte < 0x80),
                    ErrorKind::ValueOutOfRange("sysex data byte with top bit set")
                );
                out.push(0xF0);
                out.extend_from_slice(data);
                out.push(0xF7);
            }
            SystemCommon::MtcQuarterFrame(kind, value) => {
                out.extend_from_slice(&[0xF1, kind.as_code() << 4 | value.as_int()]);
            }
            SystemCommon::SongPosition(position) => {
                let raw = position.as_int();
                out.extend_from_slice(&[0xF2, (raw & 0x7F) as u8, (raw >> 7) as u8]);
            }
            SystemCommon::SongSelect(song) => out.extend_from_slice(&[0xF3, song.as_int()]),
            SystemCommon::TuneRequest => out.push(0xF6),
        }
        Ok(())
    }

    fn status(&self) -> u8 {
        match self {
            SystemCommon::SysEx(_) => 0xF0,
            SystemCommon::MtcQuarterFrame(..) => 0xF1,
            SystemCommon::SongPosition(_) => 0xF2,
            SystemCommon::SongSelect(_) => 0xF3,
            SystemCommon::TuneRequest => 0xF6,
        }
    }
}

/// The different kinds of info a MIDI Time Code Quarter Frame message can
/// carry.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MtcKind {
    /// The low nibble of the frame count.
    FramesLow,
    /// The high nibble of the frame count.
    FramesHigh,
    /// The low nibble of the second count.
    SecondsLow,
    /// The high nibble of the second count.
    SecondsHigh,
    /// The low nibble of the minute count.
    MinutesLow,
    /// The high nibble of the minute count.
    MinutesHigh,
    /// The low nibble of the hour count.
    HoursLow,
    /// The high nibble of the hour count.
    HoursHigh,
}
impl MtcKind {
    fn from_code(code: u8) -> MtcKind {
        use MtcKind::*;
        match code & 0b111 {
            0 => FramesLow,
            1 => FramesHigh,
            2 => SecondsLow,
            3 => SecondsHigh,
            4 => MinutesLow,
            5 => MinutesHigh,
            6 => HoursLow,
            _ => HoursHigh,
        }
    }

    fn as_code(self) -> u8 {
        use MtcKind::*;
        match self {
            FramesLow => 0,
            FramesHigh => 1,
            SecondsLow => 2,
            SecondsHigh => 3,
            MinutesLow => 4,
            MinutesHigh => 5,
            HoursLow => 6,
            HoursHigh => 7,
        }
    }
}

/// A System Realtime message: timing-critical, a single status byte with no
/// data, never participating in running status.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum SystemRealtime {
    /// The timing clock. If sent, 24 of these arrive per quarter note.
    TimingClock,
    /// Request the receiver to start playing from position 0.
    Start,
    /// Request the receiver to continue playing from where it stopped.
    Continue,
    /// Request the receiver to stop playing, keeping its position.
    Stop,
    /// Keep-alive; once sent, one should arrive every 300ms or the
    /// connection is considered broken.
    ActiveSensing,
    /// Request the receiver to reset to its power-up state.
    ///
    /// The `0xFF` status this message uses doubles as the meta event prefix
    /// inside track streams, so it can only ever be decoded from raw wire
    /// data, never from a track.
    Reset,
}
impl SystemRealtime {
    fn from_status(status: u8) -> Option<SystemRealtime> {
        Some(match status {
            0xF8 => SystemRealtime::TimingClock,
            0xFA => SystemRealtime::Start,
            0xFB => SystemRealtime::Continue,
            0xFC => SystemRealtime::Stop,
            0xFE => SystemRealtime::ActiveSensing,
            0xFF => SystemRealtime::Reset,
            _ => return None,
        })
    }

    /// The status byte of this message, which is its entire encoding.
    pub fn status(&self) -> u8 {
        match self {
            SystemRealtime::TimingClock => 0xF8,
            SystemRealtime::Start => 0xFA,
            SystemRealtime::Continue => 0xFB,
            SystemRealtime::Stop => 0xFC,
            SystemRealtime::ActiveSensing => 0xFE,
            SystemRealtime::Reset => 0xFF,
        }
    }
}

/// A meta event, as defined by the SMF spec: metadata about the track,
/// carried in the file but never sent over a wire.
///
/// Wire format: `0xFF`, a type byte, a variable-length payload length, then
/// the payload. Recognized types decode into typed variants only when their
/// payload has the canonical length for that type; anything else is kept
/// verbatim as [`Unknown`](#variant.Unknown), so a syntactically valid meta
/// event never fails to decode and always re-encodes byte-identically.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub enum MetaMessage {
    /// The number identifying this track pattern. Can be empty, in which
    /// case it defaults to the track's index in the file.
    SequenceNumber(Option<u16>),
    /// Arbitrary text associated to an instant.
    Text(Vec<u8>),
    /// A copyright notice.
    Copyright(Vec<u8>),
    /// The name of the track.
    TrackName(Vec<u8>),
    /// The name of the instrument used in the track.
    InstrumentName(Vec<u8>),
    /// A fragment of the lyrics, associated to an instant.
    Lyric(Vec<u8>),
    /// A marker for a point of the sequence (a rehearsal letter, a section
    /// name).
    Marker(Vec<u8>),
    /// A cue point, describing something happening at this instant.
    CuePoint(Vec<u8>),
    /// The name of the program (patch) in use from this point.
    ProgramName(Vec<u8>),
    /// The name of the device this track is intended for.
    DeviceName(Vec<u8>),
    /// Associates the following meta/sysex events with a MIDI channel.
    ChannelPrefix(u4),
    /// Associates the following events with a MIDI port.
    PortPrefix(u7),
    /// Obligatory as the last event of every track, and legal nowhere else.
    EndOfTrack,
    /// Amount of microseconds per quarter note.
    ///
    /// Usually appears at the beginning of the tempo track, but there are no
    /// guarantees.
    Tempo(u24),
    /// The SMPTE time at which the track is supposed to start.
    SmpteOffset(SmpteTime),
    /// In order of the MIDI specification: numerator, denominator (as a
    /// power of two), MIDI clocks per metronome click, and 32nd notes per
    /// quarter note.
    TimeSignature(u8, u8, u8, u8),
    /// The key signature: a count of sharps (positive) or flats (negative),
    /// and whether the scale is minor (`true`) or major (`false`).
    KeySignature(i8, bool),
    /// Arbitrary data intended for the sequencer that produced the file.
    SequencerSpecific(Vec<u8>),
    /// An unrecognized meta event, preserved verbatim.
    ///
    /// The first field is the raw type byte, the second the raw payload.
    Unknown(u8, Vec<u8>),
}
impl MetaMessage {
    fn read(raw: &mut &[u8]) -> StdResult<MetaMessage, ErrorKind> {
        let type_byte = u8::read(raw)?;
        let length = vlq::read(raw)?.as_int() as usize;
        let mut data = raw
            .split_checked(length)
            .ok_or(ErrorKind::TruncatedTrack("meta event payload overruns the track"))?;
        Ok(match (type_byte, data.len()) {
            (0x00, 0) => MetaMessage::SequenceNumber(None),
            (0x00, 2) => MetaMessage::SequenceNumber(Some(u16::read(&mut data)?)),
            (0x01, _) => MetaMessage::Text(data.to_vec()),
            (0x02, _) => MetaMessage::Copyright(data.to_vec()),
            (0x03, _) => MetaMessage::TrackName(data.to_vec()),
            (0x04, _) => MetaMessage::InstrumentName(data.to_vec()),
            (0x05, _) => MetaMessage::Lyric(data.to_vec()),
            (0x06, _) => MetaMessage::Marker(data.to_vec()),
            (0x07, _) => MetaMessage::CuePoint(data.to_vec()),
            (0x08, _) => MetaMessage::ProgramName(data.to_vec()),
            (0x09, _) => MetaMessage::DeviceName(data.to_vec()),
            (0x20, 1) if data[0] < 16 => MetaMessage::ChannelPrefix(u4::new(data[0])),
            (0x21, 1) if data[0] < 128 => MetaMessage::PortPrefix(u7::new(data[0])),
            (0x2F, 0) => MetaMessage::EndOfTrack,
            (0x51, 3) => MetaMessage::Tempo(u24::read(&mut data)?),
            (0x54, 5) => match SmpteTime::read(data) {
                Some(time) => MetaMessage::SmpteOffset(time),
                None => MetaMessage::Unknown(type_byte, data.to_vec()),
            },
            (0x58, 4) => MetaMessage::TimeSignature(data[0], data[1], data[2], data[3]),
            (0x59, 2) if data[1] <= 1 => {
                MetaMessage::KeySignature(data[0] as i8, data[1] != 0)
            }
            (0x7F, _) => MetaMessage::SequencerSpecific(data.to_vec()),
            _ => MetaMessage::Unknown(type_byte, data.to_vec()),
        })
    }

    /// Write the type byte, length and payload, not including the leading
    /// `0xFF`.
    fn write(&self, out: &mut Vec<u8>) -> StdResult<(), ErrorKind> {
        fn put(out: &mut Vec<u8>, type_byte: u8, data: &[u8]) -> StdResult<(), ErrorKind> {
            out.push(type_byte);
            let length = u32::try_from(data.len())
                .ok()
                .and_then(u28::try_from)
                .ok_or(ErrorKind::ValueOutOfRange("meta event payload too long"))?;
            vlq::write(length, out);
            out.extend_from_slice(data);
            Ok(())
        }
        match self {
            MetaMessage::SequenceNumber(None) => put(out, 0x00, &[]),
            MetaMessage::SequenceNumber(Some(number)) => put(out, 0x00, &number.to_be_bytes()),
            MetaMessage::Text(data) => put(out, 0x01, data),
            MetaMessage::Copyright(data) => put(out, 0x02, data),
            MetaMessage::TrackName(data) => put(out, 0x03, data),
            MetaMessage::InstrumentName(data) => put(out, 0x04, data),
            MetaMessage::Lyric(data) => put(out, 0x05, data),
            MetaMessage::Marker(data) => put(out, 0x06, data),
            MetaMessage::CuePoint(data) => put(out, 0x07, data),
            MetaMessage::ProgramName(data) => put(out, 0x08, data),
            MetaMessage::DeviceName(data) => put(out, 0x09, data),
            MetaMessage::ChannelPrefix(channel) => put(out, 0x20, &[channel.as_int()]),
            MetaMessage::PortPrefix(port) => put(out, 0x21, &[port.as_int()]),
            MetaMessage::EndOfTrack => put(out, 0x2F, &[]),
            MetaMessage::Tempo(micros_per_quarter) => {
                put(out, 0x51, &micros_per_quarter.as_int().to_be_bytes()[1..])
            }
            MetaMessage::SmpteOffset(time) => put(out, 0x54, &time.encode()),
            MetaMessage::TimeSignature(num, den, clocks_per_click, thirtyseconds_per_quarter) => {
                put(
                    out,
                    0x58,
                    &[*num, *den, *clocks_per_click, *thirtyseconds_per_quarter],
                )
            }
            MetaMessage::KeySignature(sharps, minor) => {
                put(out, 0x59, &[*sharps as u8, *minor as u8])
            }
            MetaMessage::SequencerSpecific(data) => put(out, 0x7F, data),
            MetaMessage::Unknown(type_byte, data) => put(out, *type_byte, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Check that each byte string decodes to the given message and that the
    /// message encodes back to the same bytes, all without a running status.
    fn test_equiv(list: &[(&[u8], Message)]) {
        for (raw, msg) in list {
            let (decoded, consumed, _) = Message::decode(raw, None).unwrap();
            assert_eq!(&decoded, msg);
            assert_eq!(consumed, raw.len());
            let mut out = Vec::new();
            msg.encode(None, &mut out).unwrap();
            assert_eq!(&out[..], *raw);
        }
    }

    fn channel(channel: u8, message: ChannelMessage) -> Message {
        Message::Channel {
            channel: u4::new(channel),
            message,
        }
    }

    #[test]
    fn channel_messages() {
        use crate::message::ChannelMessage::*;
        test_equiv(&[
            (
                &[0x80, 60, 64],
                channel(
                    0,
                    NoteOff {
                        key: u7::new(60),
                        vel: u7::new(64),
                    },
                ),
            ),
            (
                &[0x9A, 127, 1],
                channel(
                    10,
                    NoteOn {
                        key: u7::new(127),
                        vel: u7::new(1),
                    },
                ),
            ),
            (
                &[0xA7, 12, 99],
                channel(
                    7,
                    Aftertouch {
                        key: u7::new(12),
                        vel: u7::new(99),
                    },
                ),
            ),
            (
                &[0xB3, 7, 100],
                channel(
                    3,
                    Controller {
                        controller: u7::new(7),
                        value: u7::new(100),
                    },
                ),
            ),
            (&[0xC5, 42], channel(5, ProgramChange { program: u7::new(42) })),
            (&[0xDF, 3], channel(15, ChannelAftertouch { vel: u7::new(3) })),
            (
                &[0xE0, 0x00, 0x40],
                channel(
                    0,
                    PitchBend {
                        bend: crate::message::PitchBend::mid_raw_value(),
                    },
                ),
            ),
            (
                &[0xE1, 0x7F, 0x7F],
                channel(
                    1,
                    PitchBend {
                        bend: crate::message::PitchBend::from_int(0x1FFF),
                    },
                ),
            ),
        ]);
    }

    #[test]
    fn mode_messages() {
        let modes: &[(&[u8], ModeMessage)] = &[
            (&[0xB0, 120, 0], ModeMessage::AllSoundOff),
            (&[0xB0, 121, 0], ModeMessage::ResetAllControllers),
            (&[0xB0, 122, 0], ModeMessage::LocalControl(false)),
            (&[0xB0, 122, 127], ModeMessage::LocalControl(true)),
            (&[0xB0, 123, 0], ModeMessage::AllNotesOff),
            (&[0xB0, 124, 0], ModeMessage::OmniOff),
            (&[0xB0, 125, 0], ModeMessage::OmniOn),
            (&[0xB0, 126, 4], ModeMessage::MonoMode(u7::new(4))),
            (&[0xB0, 127, 0], ModeMessage::PolyMode),
        ];
        for &(raw, mode) in modes {
            test_equiv(&[(
                raw,
                Message::Mode {
                    channel: u4::new(0),
                    message: mode,
                },
            )]);
        }
    }

    #[test]
    fn noncanonical_mode_payload_stays_a_controller() {
        // All Sound Off with a nonzero value is not a canonical mode
        // message; it must round-trip as the controller bytes it came from.
        test_equiv(&[(
            &[0xB0, 120, 5],
            channel(
                0,
                ChannelMessage::Controller {
                    controller: u7::new(120),
                    value: u7::new(5),
                },
            ),
        )]);
    }

    #[test]
    fn system_common_messages() {
        use crate::message::SystemCommon::*;
        test_equiv(&[
            (
                &[0xF0, 0x43, 0x12, 0x00, 0xF7],
                Message::Common(SysEx(vec![0x43, 0x12, 0x00])),
            ),
            (&[0xF0, 0xF7], Message::Common(SysEx(vec![]))),
            (
                &[0xF1, 0x36],
                Message::Common(MtcQuarterFrame(MtcKind::SecondsHigh, u4::new(6))),
            ),
            (
                &[0xF2, 0x08, 0x01],
                Message::Common(SongPosition(u14::new(136))),
            ),
            (&[0xF3, 0x01], Message::Common(SongSelect(u7::new(1)))),
            (&[0xF6], Message::Common(TuneRequest)),
        ]);
    }

    #[test]
    fn realtime_messages() {
        use crate::message::SystemRealtime::*;
        test_equiv(&[
            (&[0xF8], Message::Realtime(TimingClock)),
            (&[0xFA], Message::Realtime(Start)),
            (&[0xFB], Message::Realtime(Continue)),
            (&[0xFC], Message::Realtime(Stop)),
            (&[0xFE], Message::Realtime(ActiveSensing)),
        ]);
        for &status in &[0xF9u8, 0xFD] {
            let err = Message::decode(&[status], None).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::ValueOutOfRange(_)));
        }
    }

    #[test]
    fn meta_messages() {
        use crate::message::MetaMessage::*;
        test_equiv(&[
            (
                &[0xFF, 0x00, 0x02, 0x00, 0x2A],
                Message::Meta(SequenceNumber(Some(42))),
            ),
            (&[0xFF, 0x00, 0x00], Message::Meta(SequenceNumber(None))),
            (
                &[0xFF, 0x03, 0x05, b'p', b'i', b'a', b'n', b'o'],
                Message::Meta(TrackName(b"piano".to_vec())),
            ),
            (&[0xFF, 0x20, 0x01, 0x09], Message::Meta(ChannelPrefix(u4::new(9)))),
            (&[0xFF, 0x21, 0x01, 0x02], Message::Meta(PortPrefix(u7::new(2)))),
            (&[0xFF, 0x2F, 0x00], Message::Meta(EndOfTrack)),
            (
                &[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20],
                Message::Meta(Tempo(u24::new(500_000))),
            ),
            (
                &[0xFF, 0x58, 0x04, 0x06, 0x03, 0x24, 0x08],
                Message::Meta(TimeSignature(6, 3, 36, 8)),
            ),
            (
                &[0xFF, 0x59, 0x02, 0xFD, 0x01],
                Message::Meta(KeySignature(-3, true)),
            ),
            (
                &[0xFF, 0x7F, 0x03, 0x00, 0x01, 0x44],
                Message::Meta(SequencerSpecific(vec![0x00, 0x01, 0x44])),
            ),
            (
                &[0xFF, 0x60, 0x02, 0xAA, 0xBB],
                Message::Meta(Unknown(0x60, vec![0xAA, 0xBB])),
            ),
        ]);
    }

    #[test]
    fn meta_with_noncanonical_length_is_preserved_verbatim() {
        // A tempo event must have exactly 3 payload bytes; anything else is
        // kept as an unknown event rather than rejected or truncated.
        test_equiv(&[(
            &[0xFF, 0x51, 0x02, 0x07, 0xA1],
            Message::Meta(MetaMessage::Unknown(0x51, vec![0x07, 0xA1])),
        )]);
    }

    #[test]
    fn running_status_reuses_the_previous_status() {
        let (_, _, status) = Message::decode(&[0x93, 60, 100], None).unwrap();
        assert_eq!(status, Some(0x93));
        let (msg, consumed, status) = Message::decode(&[62, 101], status).unwrap();
        assert_eq!(
            msg,
            channel(
                3,
                ChannelMessage::NoteOn {
                    key: u7::new(62),
                    vel: u7::new(101),
                },
            )
        );
        assert_eq!(consumed, 2);
        assert_eq!(status, Some(0x93));
    }

    #[test]
    fn data_byte_without_any_status_is_an_error() {
        let err = Message::decode(&[60, 100], None).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidRunningStatus));
    }

    #[test]
    fn meta_clears_running_status() {
        let (_, _, status) = Message::decode(&[0x93, 60, 100], None).unwrap();
        let (_, _, status) = Message::decode(&[0xFF, 0x2F, 0x00], status).unwrap();
        assert_eq!(status, None);
    }

    #[test]
    fn encode_compresses_repeated_status() {
        let note = |key: u8| {
            channel(
                2,
                ChannelMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(100),
                },
            )
        };
        let mut out = Vec::new();
        let status = note(60).encode(None, &mut out).unwrap();
        let status = note(64).encode(status, &mut out).unwrap();
        assert_eq!(status, Some(0x92));
        assert_eq!(out, vec![0x92, 60, 100, 64, 100]);
    }

    #[test]
    fn truncated_sysex_is_an_error() {
        let err = Message::decode(&[0xF0, 0x01, 0x02], None).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::TruncatedTrack(_)));
    }

    #[test]
    fn data_byte_with_top_bit_set_is_an_error() {
        let err = Message::decode(&[0x90, 60, 0x85], None).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ValueOutOfRange(_)));
    }
}
