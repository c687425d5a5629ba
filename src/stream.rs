//! The running-status stream codec: turns the raw payload of a track chunk
//! into a sequence of events and back, threading the running status through
//! consecutive messages.

use crate::{
    event::Event,
    message::{Message, MetaMessage},
    prelude::*,
    smf::Strictness,
    vlq,
};
use log::warn;

/// Decode a whole track event stream.
///
/// The stream terminates at the first end-of-track event. A stream that runs
/// out of bytes first is rejected in strict mode; in lenient mode the events
/// that decoded cleanly are kept and the track is closed with a synthesized
/// end-of-track event. `base_offset` is where `raw` starts within the
/// decoded file, so that errors carry absolute positions.
pub(crate) fn decode_events(
    raw: &[u8],
    base_offset: usize,
    strictness: Strictness,
) -> Result<Vec<Event>> {
    // Real-world tracks average a bit over 3 bytes per event when running
    // status is in use.
    let mut events = Vec::with_capacity(raw.len() / 3);
    let mut cursor = raw;
    let mut running_status = None;
    loop {
        if cursor.is_empty() {
            match strictness {
                Strictness::Strict => {
                    return Err(Error::from(ErrorKind::TruncatedTrack(
                        "track stream ended without an end-of-track event",
                    ))
                    .at(base_offset + raw.len()));
                }
                Strictness::Lenient => {
                    events.push(end_of_track());
                    break;
                }
            }
        }
        let offset = base_offset + (raw.len() - cursor.len());
        match Event::read(&mut cursor, &mut running_status) {
            Ok(event) => {
                let done = matches!(event.message, Message::Meta(MetaMessage::EndOfTrack));
                events.push(event);
                if done {
                    if !cursor.is_empty() {
                        let consumed = raw.len() - cursor.len();
                        match strictness {
                            Strictness::Strict => {
                                return Err(Error::from(ErrorKind::ChunkLengthMismatch {
                                    declared: raw.len() as u32,
                                    actual: consumed,
                                })
                                .at(base_offset + consumed));
                            }
                            Strictness::Lenient => {
                                warn!(
                                    "ignoring {} bytes after the end-of-track event",
                                    cursor.len()
                                );
                            }
                        }
                    }
                    break;
                }
            }
            Err(kind) => match strictness {
                Strictness::Strict => return Err(Error::from(kind).at(offset)),
                Strictness::Lenient => {
                    warn!("truncating track at byte {}: {}", offset, kind);
                    events.push(end_of_track());
                    break;
                }
            },
        }
    }
    Ok(events)
}

/// Encode a track event stream.
///
/// The written stream always terminates with exactly one end-of-track
/// event: one is appended if the input lacks it, and end-of-track events
/// anywhere before the end are dropped, folding their delta times into the
/// following event. Well-formed input is reproduced byte for byte.
pub(crate) fn encode_events(events: &[Event], out: &mut Vec<u8>) -> StdResult<(), ErrorKind> {
    let mut running_status = None;
    // Delta ticks carried over from dropped interior end-of-track events.
    let mut carry: u64 = 0;
    for event in events {
        match event.message {
            Message::Meta(MetaMessage::EndOfTrack) => {
                carry += u64::from(event.delta.as_int());
            }
            _ => {
                let delta = fold_delta(carry, event.delta)?;
                carry = 0;
                vlq::write(delta, out);
                event.message.write(&mut running_status, out)?;
            }
        }
    }
    let delta = fold_delta(carry, u28::new(0))?;
    vlq::write(delta, out);
    Message::Meta(MetaMessage::EndOfTrack).write(&mut running_status, out)?;
    Ok(())
}

fn fold_delta(carry: u64, delta: u28) -> StdResult<u28, ErrorKind> {
    u32::try_from(carry + u64::from(delta.as_int()))
        .ok()
        .and_then(u28::try_from)
        .ok_or(ErrorKind::ValueOutOfRange("accumulated delta time exceeds 28 bits"))
}

fn end_of_track() -> Event {
    Event {
        delta: u28::new(0),
        message: Message::Meta(MetaMessage::EndOfTrack),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChannelMessage;
    use pretty_assertions::assert_eq;

    fn note_on(delta: u32, key: u8) -> Event {
        Event::new(
            delta,
            Message::Channel {
                channel: u4::new(0),
                message: ChannelMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(100),
                },
            },
        )
    }

    #[test]
    fn compresses_running_status() {
        let events = vec![note_on(0, 60), note_on(96, 64), end_of_track()];
        let mut out = Vec::new();
        encode_events(&events, &mut out).unwrap();
        // The second note-on must not repeat its status byte.
        assert_eq!(
            out,
            vec![0x00, 0x90, 60, 100, 0x60, 64, 100, 0x00, 0xFF, 0x2F, 0x00]
        );
        assert_eq!(decode_events(&out, 0, Strictness::Strict).unwrap(), events);
    }

    #[test]
    fn meta_events_interrupt_running_status() {
        let events = vec![
            note_on(0, 60),
            Event::new(0, Message::Meta(MetaMessage::Marker(b"a".to_vec()))),
            note_on(0, 64),
            end_of_track(),
        ];
        let mut out = Vec::new();
        encode_events(&events, &mut out).unwrap();
        // The second note-on needs its status again after the meta event.
        assert_eq!(
            out,
            vec![
                0x00, 0x90, 60, 100, 0x00, 0xFF, 0x06, 0x01, b'a', 0x00, 0x90, 64, 100, 0x00,
                0xFF, 0x2F, 0x00
            ]
        );
        assert_eq!(decode_events(&out, 0, Strictness::Strict).unwrap(), events);
    }

    #[test]
    fn interior_end_of_track_is_folded_away() {
        let events = vec![
            note_on(0, 60),
            Event::new(10, Message::Meta(MetaMessage::EndOfTrack)),
            note_on(5, 64),
            end_of_track(),
        ];
        let mut out = Vec::new();
        encode_events(&events, &mut out).unwrap();
        let reparsed = decode_events(&out, 0, Strictness::Strict).unwrap();
        assert_eq!(reparsed, vec![note_on(0, 60), note_on(15, 64), end_of_track()]);
    }

    #[test]
    fn missing_end_of_track_is_appended_on_encode() {
        let events = vec![note_on(0, 60)];
        let mut out = Vec::new();
        encode_events(&events, &mut out).unwrap();
        let reparsed = decode_events(&out, 0, Strictness::Strict).unwrap();
        assert_eq!(reparsed, vec![note_on(0, 60), end_of_track()]);
    }

    #[test]
    fn strict_decode_requires_end_of_track() {
        let raw = [0x00, 0x90, 60, 100];
        let err = decode_events(&raw, 0, Strictness::Strict).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::TruncatedTrack(_)));
        assert_eq!(err.offset(), Some(raw.len()));
    }

    #[test]
    fn lenient_decode_closes_a_truncated_track() {
        let raw = [0x00, 0x90, 60, 100];
        let events = decode_events(&raw, 0, Strictness::Lenient).unwrap();
        assert_eq!(events, vec![note_on(0, 60), end_of_track()]);
    }

    #[test]
    fn lenient_decode_salvages_up_to_the_malformed_event() {
        // The second event is cut off in the middle of its data bytes.
        let raw = [0x00, 0x90, 60, 100, 0x00, 0x90, 62];
        let events = decode_events(&raw, 0, Strictness::Lenient).unwrap();
        assert_eq!(events, vec![note_on(0, 60), end_of_track()]);
    }

    #[test]
    fn strict_decode_rejects_bytes_after_end_of_track() {
        let raw = [0x00, 0xFF, 0x2F, 0x00, 0x00, 0x90, 60, 100];
        let err = decode_events(&raw, 0, Strictness::Strict).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ChunkLengthMismatch { .. }));
    }

    #[test]
    fn error_offsets_are_absolute() {
        let raw = [0x00, 0x90, 60, 0x85];
        let err = decode_events(&raw, 100, Strictness::Strict).unwrap_err();
        assert_eq!(err.offset(), Some(100));
    }
}
