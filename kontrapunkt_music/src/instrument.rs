// Instrument model: how logical voices become MIDI tracks.
//
// Organ output follows a fixed manual layout that downstream renderers rely
// on: Great, Swell, Positiv, Pedal, with a fifth voice doubling onto the
// Great's channel. Every other instrument gets one track per voice on its
// own channel with the instrument's GM program. Track order always follows
// voice order.

use crate::config::Instrument;
use crate::note::{NoteEvent, Track, VoiceId};

/// General MIDI programs (zero-based).
pub const PROGRAM_CHURCH_ORGAN: u8 = 19;
pub const PROGRAM_REED_ORGAN: u8 = 20;
pub const PROGRAM_HARPSICHORD: u8 = 6;
pub const PROGRAM_PIANO: u8 = 0;
pub const PROGRAM_VIOLIN: u8 = 40;
pub const PROGRAM_CELLO: u8 = 42;
pub const PROGRAM_GUITAR: u8 = 24;

/// Channel, program and track name for each organ voice.
pub const ORGAN_LAYOUT: [(u8, u8, &str); 5] = [
    (0, PROGRAM_CHURCH_ORGAN, "Manual I (Great)"),
    (1, PROGRAM_REED_ORGAN, "Manual II (Swell)"),
    (2, PROGRAM_CHURCH_ORGAN, "Manual III (Positiv)"),
    (3, PROGRAM_CHURCH_ORGAN, "Pedal"),
    (0, PROGRAM_CHURCH_ORGAN, "Manual I (Great)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentProfile {
    pub program: u8,
    /// Playable pitch range, inclusive.
    pub low: u8,
    pub high: u8,
    /// Beat accents apply; false means velocity stays at the default.
    pub velocity_sensitive: bool,
    pub bowed: bool,
}

pub fn profile(instrument: Instrument) -> InstrumentProfile {
    let (program, low, high, velocity_sensitive, bowed) = match instrument {
        Instrument::Organ => (PROGRAM_CHURCH_ORGAN, 24, 96, false, false),
        Instrument::Harpsichord => (PROGRAM_HARPSICHORD, 29, 89, true, false),
        Instrument::Piano => (PROGRAM_PIANO, 21, 108, true, false),
        Instrument::Violin => (PROGRAM_VIOLIN, 55, 103, true, true),
        Instrument::Cello => (PROGRAM_CELLO, 36, 76, true, true),
        Instrument::Guitar => (PROGRAM_GUITAR, 40, 88, true, false),
    };
    InstrumentProfile {
        program,
        low,
        high,
        velocity_sensitive,
        bowed,
    }
}

fn display_name(instrument: Instrument) -> &'static str {
    match instrument {
        Instrument::Organ => "Organ",
        Instrument::Harpsichord => "Harpsichord",
        Instrument::Piano => "Piano",
        Instrument::Violin => "Violin",
        Instrument::Cello => "Cello",
        Instrument::Guitar => "Guitar",
    }
}

/// Empty track for `voice`.
pub fn track_for_voice(instrument: Instrument, voice: VoiceId) -> Track {
    let i = voice as usize;
    if instrument == Instrument::Organ {
        let (channel, program, name) = ORGAN_LAYOUT[i % ORGAN_LAYOUT.len()];
        return Track::new(channel, program, name);
    }
    // Channel 9 is percussion in GM.
    let channel = if i >= 9 { i as u8 + 1 } else { i as u8 };
    Track::new(
        channel,
        profile(instrument).program,
        format!("{} {}", display_name(instrument), i + 1),
    )
}

/// One track per voice, in voice order, notes sorted.
pub fn build_tracks(instrument: Instrument, voices: Vec<(VoiceId, Vec<NoteEvent>)>) -> Vec<Track> {
    let mut voices = voices;
    voices.sort_by_key(|(id, _)| *id);
    voices
        .into_iter()
        .map(|(id, notes)| {
            let mut track = track_for_voice(instrument, id);
            track.notes = notes;
            track.sort_notes();
            track
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::Provenance;

    #[test]
    fn organ_layout_is_stable() {
        let tracks: Vec<Track> = (0..5).map(|v| track_for_voice(Instrument::Organ, v)).collect();
        assert_eq!(tracks[0].name, "Manual I (Great)");
        assert_eq!(tracks[1].program, PROGRAM_REED_ORGAN);
        assert_eq!(tracks[2].name, "Manual III (Positiv)");
        assert_eq!((tracks[3].channel, tracks[3].name.as_str()), (3, "Pedal"));
        assert_eq!(tracks[4].channel, 0);
        assert_eq!(tracks[4].name, tracks[0].name);
    }

    #[test]
    fn other_instruments_get_a_channel_per_voice() {
        let t = track_for_voice(Instrument::Cello, 2);
        assert_eq!((t.channel, t.program), (2, PROGRAM_CELLO));
        assert_eq!(t.name, "Cello 3");
        assert!(profile(Instrument::Violin).bowed);
        assert!(!profile(Instrument::Organ).velocity_sensitive);
    }

    #[test]
    fn build_tracks_orders_by_voice() {
        let voices = vec![
            (1, vec![NoteEvent::new(0, 480, 48, 1, Provenance::FugueAnswer)]),
            (
                0,
                vec![
                    NoteEvent::new(480, 480, 64, 0, Provenance::FugueSubject),
                    NoteEvent::new(0, 480, 60, 0, Provenance::FugueSubject),
                ],
            ),
        ];
        let tracks = build_tracks(Instrument::Piano, voices);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].name, "Piano 1");
        assert_eq!(tracks[0].notes[0].start_tick, 0);
        assert_eq!(tracks[1].notes[0].pitch, 48);
    }
}
