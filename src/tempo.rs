//! Tick-time arithmetic: converting tick offsets to wall-clock time through
//! the tempo map of a track.

use crate::{
    message::{Message, MetaMessage},
    prelude::*,
    primitive::{Division, Format},
    smf::{MidiFile, Track},
};

/// The default tempo, 120 BPM as microseconds per quarter note, in effect
/// before the first set-tempo event of a track.
pub const DEFAULT_TEMPO: u32 = 500_000;

/// A read-only map from tick offsets to elapsed time, derived from the
/// set-tempo meta events of one track.
///
/// The map is a monotonic step function of breakpoints; between two
/// breakpoints time accumulates linearly at the tempo set by the earlier
/// one. It is not kept in sync with the source file: rebuild it if the
/// tempo track changes.
///
/// For files with SMPTE timing the tempo events are irrelevant, since a
/// tick already has an absolute duration of `1 / (fps * ticks_per_frame)`
/// seconds.
#[derive(Clone, Debug)]
pub struct TempoMap {
    division: Division,
    /// Always non-empty, always starts at tick 0.
    points: Vec<TempoPoint>,
}

#[derive(Copy, Clone, Debug)]
struct TempoPoint {
    /// The tick where this tempo takes effect.
    tick: u64,
    /// Microseconds elapsed from the start of the track to `tick`.
    micros_at: f64,
    /// Microseconds per quarter note from this point on.
    micros_per_quarter: u32,
}

impl TempoMap {
    /// Build the tempo map from the conventional tempo track, track 0.
    ///
    /// A file with no tracks, or whose tempo track has no set-tempo events,
    /// yields a map that stays at the default 120 BPM throughout.
    pub fn new(midi: &MidiFile) -> TempoMap {
        TempoMap::with_track(midi, 0)
    }

    /// Build the tempo map from an explicitly chosen track.
    ///
    /// This matters for multi-track-async files, where each track is an
    /// independent pattern and no single track can speak for the others.
    pub fn with_track(midi: &MidiFile, track: usize) -> TempoMap {
        TempoMap::build(midi.division(), midi.tracks().get(track))
    }

    fn build(division: Division, track: Option<&Track>) -> TempoMap {
        let mut points = vec![TempoPoint {
            tick: 0,
            micros_at: 0.0,
            micros_per_quarter: DEFAULT_TEMPO,
        }];
        if let (Division::TicksPerQuarter(tpq), Some(track)) = (division, track) {
            if tpq.as_int() != 0 {
                let mut now = 0;
                for event in track.iter() {
                    now += u64::from(event.delta.as_int());
                    if let Message::Meta(MetaMessage::Tempo(tempo)) = &event.message {
                        let last = points[points.len() - 1];
                        let micros_at = last.micros_at
                            + ticks_to_micros(now - last.tick, last.micros_per_quarter, tpq.as_int());
                        let point = TempoPoint {
                            tick: now,
                            micros_at,
                            micros_per_quarter: tempo.as_int(),
                        };
                        match points.last_mut() {
                            // Several tempo events on the same tick: the
                            // last one wins.
                            Some(last) if last.tick == now => *last = point,
                            _ => points.push(point),
                        }
                    }
                }
            }
        }
        TempoMap { division, points }
    }

    /// The tempo in effect at `tick`, as microseconds per quarter note.
    pub fn tempo_at(&self, tick: u64) -> u32 {
        self.point_at(tick).micros_per_quarter
    }

    /// Absolute time of `tick`, in seconds from the track start.
    ///
    /// Fails with [`ErrorKind::NoDivisionInfo`](enum.ErrorKind.html) if the
    /// division is zero and therefore defines no tick length.
    pub fn ticks_to_seconds(&self, tick: u64) -> Result<f64> {
        match self.division {
            Division::Smpte(fps, ticks_per_frame) => {
                ensure!(ticks_per_frame != 0, ErrorKind::NoDivisionInfo);
                Ok(tick as f64 / (f64::from(fps.as_f32()) * f64::from(ticks_per_frame)))
            }
            Division::TicksPerQuarter(tpq) => {
                ensure!(tpq.as_int() != 0, ErrorKind::NoDivisionInfo);
                let point = self.point_at(tick);
                let micros = point.micros_at
                    + ticks_to_micros(tick - point.tick, point.micros_per_quarter, tpq.as_int());
                Ok(micros / 1e6)
            }
        }
    }

    /// Inverse of [`ticks_to_seconds`](#method.ticks_to_seconds): the tick
    /// whose absolute time is closest to `seconds`.
    pub fn seconds_to_ticks(&self, seconds: f64) -> Result<u64> {
        match self.division {
            Division::Smpte(fps, ticks_per_frame) => {
                ensure!(ticks_per_frame != 0, ErrorKind::NoDivisionInfo);
                Ok((seconds * f64::from(fps.as_f32()) * f64::from(ticks_per_frame)).round() as u64)
            }
            Division::TicksPerQuarter(tpq) => {
                ensure!(tpq.as_int() != 0, ErrorKind::NoDivisionInfo);
                let micros = seconds * 1e6;
                let point = self.point_at_micros(micros);
                let ticks = (micros - point.micros_at) * f64::from(tpq.as_int())
                    / f64::from(point.micros_per_quarter);
                Ok(point.tick + ticks.round() as u64)
            }
        }
    }

    /// The last breakpoint at or before `tick`.
    fn point_at(&self, tick: u64) -> TempoPoint {
        let idx = self.points.partition_point(|point| point.tick <= tick);
        self.points[idx - 1]
    }

    /// The last breakpoint at or before the given elapsed time.
    fn point_at_micros(&self, micros: f64) -> TempoPoint {
        let idx = self.points.partition_point(|point| point.micros_at <= micros);
        self.points[idx.max(1) - 1]
    }
}

/// Microseconds covered by `ticks` at a fixed tempo.
///
/// The multiplication happens before the division so that metrically exact
/// inputs (ticks a multiple of the division) stay exact in floating point.
fn ticks_to_micros(ticks: u64, micros_per_quarter: u32, ticks_per_quarter: u16) -> f64 {
    (ticks as f64 * f64::from(micros_per_quarter)) / f64::from(ticks_per_quarter)
}

/// Convert beats per minute to a tempo value in microseconds per quarter
/// note: `120` becomes `500000`.
pub fn bpm_to_tempo(bpm: f64) -> u32 {
    (60_000_000.0 / bpm).round() as u32
}

/// Convert a tempo value in microseconds per quarter note to beats per
/// minute: `500000` becomes `120.0`.
pub fn tempo_to_bpm(tempo: u32) -> f64 {
    60_000_000.0 / f64::from(tempo)
}

impl MidiFile {
    /// The tempo map of this file, derived from the conventional tempo
    /// track (track 0).
    ///
    /// Use [`TempoMap::with_track`](struct.TempoMap.html#method.with_track)
    /// to choose another track.
    pub fn tempo_map(&self) -> TempoMap {
        TempoMap::new(self)
    }

    /// Playback length of the file in seconds: the end time of its
    /// longest track.
    ///
    /// Fails with [`ErrorKind::UnsupportedFormat`](enum.ErrorKind.html) for
    /// multi-track-async files, whose tracks share no timeline to measure.
    pub fn duration_seconds(&self) -> Result<f64> {
        ensure!(
            self.format() != Format::MultiTrackAsync,
            ErrorKind::UnsupportedFormat(Format::MultiTrackAsync.as_int())
        );
        let map = self.tempo_map();
        let mut length: f64 = 0.0;
        for track in self.tracks() {
            length = length.max(map.ticks_to_seconds(track.total_ticks())?);
        }
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Fps;

    fn metrical(tpq: u16) -> Division {
        Division::TicksPerQuarter(u15::new(tpq))
    }

    fn tempo_event(delta: u32, micros_per_quarter: u32) -> crate::Event {
        crate::Event::new(
            delta,
            Message::Meta(MetaMessage::Tempo(u24::new(micros_per_quarter))),
        )
    }

    fn end_of_track(delta: u32) -> crate::Event {
        crate::Event::new(delta, Message::Meta(MetaMessage::EndOfTrack))
    }

    fn file_with(division: Division, events: Vec<crate::Event>) -> MidiFile {
        MidiFile::new(crate::Format::Single, division, vec![Track::new(events)]).unwrap()
    }

    #[test]
    fn default_tempo_applies_before_any_tempo_event() {
        let midi = file_with(metrical(480), vec![end_of_track(0)]);
        let map = midi.tempo_map();
        assert_eq!(map.tempo_at(0), DEFAULT_TEMPO);
        // One quarter note at 120 BPM is half a second.
        assert_eq!(map.ticks_to_seconds(480).unwrap(), 0.5);
    }

    #[test]
    fn tempo_breakpoints_accumulate_piecewise() {
        // 1 quarter at 120 BPM, then 1 quarter at 60 BPM.
        let midi = file_with(
            metrical(96),
            vec![
                tempo_event(0, 500_000),
                tempo_event(96, 1_000_000),
                end_of_track(96),
            ],
        );
        let map = midi.tempo_map();
        assert_eq!(map.ticks_to_seconds(0).unwrap(), 0.0);
        assert_eq!(map.ticks_to_seconds(96).unwrap(), 0.5);
        assert_eq!(map.ticks_to_seconds(192).unwrap(), 1.5);
        assert_eq!(map.tempo_at(95), 500_000);
        assert_eq!(map.tempo_at(96), 1_000_000);
    }

    #[test]
    fn later_tempo_event_on_the_same_tick_wins() {
        let midi = file_with(
            metrical(96),
            vec![tempo_event(0, 500_000), tempo_event(0, 250_000), end_of_track(0)],
        );
        assert_eq!(midi.tempo_map().tempo_at(0), 250_000);
    }

    #[test]
    fn seconds_to_ticks_inverts_ticks_to_seconds() {
        let midi = file_with(
            metrical(96),
            vec![
                tempo_event(0, 500_000),
                tempo_event(96, 1_000_000),
                end_of_track(96),
            ],
        );
        let map = midi.tempo_map();
        for &tick in &[0, 1, 95, 96, 97, 192, 500] {
            let seconds = map.ticks_to_seconds(tick).unwrap();
            assert_eq!(map.seconds_to_ticks(seconds).unwrap(), tick);
        }
    }

    #[test]
    fn smpte_division_ignores_tempo_events() {
        let midi = file_with(
            Division::Smpte(Fps::Fps25, 40),
            vec![tempo_event(0, 250_000), end_of_track(0)],
        );
        let map = midi.tempo_map();
        // 25 fps x 40 ticks per frame = 1000 ticks per second, tempo or not.
        assert_eq!(map.ticks_to_seconds(1000).unwrap(), 1.0);
        assert_eq!(map.seconds_to_ticks(0.5).unwrap(), 500);
    }

    #[test]
    fn zero_division_is_rejected() {
        let midi = file_with(metrical(0), vec![end_of_track(0)]);
        let err = midi.tempo_map().ticks_to_seconds(1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoDivisionInfo));
    }

    #[test]
    fn bpm_conversions() {
        assert_eq!(bpm_to_tempo(120.0), 500_000);
        assert_eq!(bpm_to_tempo(60.0), 1_000_000);
        assert_eq!(bpm_to_tempo(240.0), 250_000);
        assert_eq!(tempo_to_bpm(500_000), 120.0);
    }

    #[test]
    fn duration_covers_the_longest_track() {
        let tempo_track = Track::new(vec![tempo_event(0, 500_000), end_of_track(0)]);
        let long_track = Track::new(vec![end_of_track(192)]);
        let midi = MidiFile::new(
            crate::Format::MultiTrackSync,
            metrical(96),
            vec![tempo_track, long_track],
        )
        .unwrap();
        assert_eq!(midi.duration_seconds().unwrap(), 1.0);
    }

    #[test]
    fn duration_is_rejected_for_async_files() {
        let midi = MidiFile::new(
            crate::Format::MultiTrackAsync,
            metrical(96),
            vec![Track::new(vec![end_of_track(0)])],
        )
        .unwrap();
        let err = midi.duration_seconds().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedFormat(2)));
    }
}
