//! Delta-timed track events.

use crate::{message::Message, prelude::*, vlq};

/// A track event: a delta time in MIDI ticks, counted from the previous
/// event in the same track, plus the message that fires after that delay.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct Event {
    /// How many MIDI ticks after the previous event this event fires.
    /// The first event of a track counts from the track start.
    pub delta: u28,
    /// The message itself.
    pub message: Message,
}
impl Event {
    /// Create an event from a raw tick count.
    ///
    /// `delta` is truncated to the 28 bits a delta time can hold.
    #[inline]
    pub fn new(delta: u32, message: Message) -> Event {
        Event {
            delta: u28::new(delta),
            message,
        }
    }

    /// Advances the cursor and updates `running_status`.
    ///
    /// In case of failure the cursor may be left in the middle of an event.
    pub(crate) fn read(
        raw: &mut &[u8],
        running_status: &mut Option<u8>,
    ) -> StdResult<Event, ErrorKind> {
        let delta = vlq::read(raw)?;
        let message = Message::read(raw, running_status)?;
        Ok(Event { delta, message })
    }

    pub(crate) fn write(
        &self,
        running_status: &mut Option<u8>,
        out: &mut Vec<u8>,
    ) -> StdResult<(), ErrorKind> {
        vlq::write(self.delta, out);
        self.message.write(running_status, out)
    }
}
