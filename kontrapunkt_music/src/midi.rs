// Standard MIDI File output.
//
// Writes a `GeneratorResult` as SMF format 1 (multi-track) through `midly`.
// Track 0 carries the time signature and tempo changes; every result track
// follows with its name, program change, expression (CC) events and note
// on/off pairs. Ticks per quarter is the core's tick base, so note times are
// written unchanged.
//
// Events are collected with absolute times, ordered (note-offs before
// controllers before note-ons on the same tick, so repeated pitches
// re-strike cleanly) and then converted to delta times.

use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;

use crate::generator::GeneratorResult;
use crate::note::{self, TempoEvent};
use crate::timing::{TICKS_PER_BEAT, Tick};

const TICKS_PER_QUARTER: u16 = TICKS_PER_BEAT as u16;

/// Write `result` to `path` as a format-1 SMF.
pub fn write_midi(result: &GeneratorResult, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let buf = to_smf_bytes(result)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

pub fn to_smf_bytes(result: &GeneratorResult) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let smf = to_smf(&result.tracks, &result.tempo_events);
    let mut buf = Vec::new();
    smf.write(&mut buf)?;
    Ok(buf)
}

/// Build an in-memory SMF borrowing track names from `tracks`.
pub fn to_smf<'a>(tracks: &'a [note::Track], tempo_events: &[TempoEvent]) -> Smf<'a> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    smf.tracks.push(tempo_track(tempo_events));
    for track in tracks {
        smf.tracks.push(voice_track(track));
    }
    smf
}

fn tempo_track(tempo_events: &[TempoEvent]) -> Track<'static> {
    let mut timed: Vec<(Tick, TrackEventKind<'static>)> = vec![(
        0,
        TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
    )];
    let mut tempos = tempo_events.to_vec();
    tempos.sort_by_key(|t| t.tick);
    for t in tempos {
        timed.push((
            t.tick,
            TrackEventKind::Meta(MetaMessage::Tempo(u24::new(t.microseconds_per_quarter()))),
        ));
    }
    with_deltas(timed)
}

fn voice_track(track: &note::Track) -> Track<'_> {
    let channel = u4::new(track.channel & 0x0f);
    // (tick, order, event): offs, then controllers, then ons.
    let mut timed: Vec<(Tick, u8, TrackEventKind<'_>)> = vec![
        (0, 0, TrackEventKind::Meta(MetaMessage::TrackName(track.name.as_bytes()))),
        (
            0,
            1,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(track.program & 0x7f),
                },
            },
        ),
    ];
    for cc in &track.raw_events {
        timed.push((
            cc.tick,
            3,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::Controller {
                    controller: u7::new(cc.controller & 0x7f),
                    value: u7::new(cc.value & 0x7f),
                },
            },
        ));
    }
    for n in &track.notes {
        let key = u7::new(n.pitch & 0x7f);
        timed.push((
            n.start_tick,
            4,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOn {
                    key,
                    vel: u7::new(n.velocity.clamp(1, 127)),
                },
            },
        ));
        timed.push((
            n.end_tick(),
            2,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOff { key, vel: u7::new(0) },
            },
        ));
    }
    timed.sort_by_key(|&(tick, order, _)| (tick, order));
    with_deltas(timed.into_iter().map(|(tick, _, kind)| (tick, kind)).collect())
}

/// Convert absolute-time events (already in order) to a delta-time track
/// closed by EndOfTrack.
fn with_deltas(timed: Vec<(Tick, TrackEventKind<'_>)>) -> Track<'_> {
    let mut track = Vec::with_capacity(timed.len() + 1);
    let mut last: Tick = 0;
    for (tick, kind) in timed {
        let tick = tick.max(last);
        track.push(TrackEvent {
            delta: u28::new(tick - last),
            kind,
        });
        last = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}
