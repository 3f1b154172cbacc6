// Whole-pipeline scenarios run through the public `generate` entry point.

use kontrapunkt_music::analysis::analyze_counterpoint;
use kontrapunkt_music::config::{Character, FormType, GeneratorConfig, Instrument};
use kontrapunkt_music::counterpoint::CounterpointState;
use kontrapunkt_music::error::CounterpointError;
use kontrapunkt_music::generate;
use kontrapunkt_music::note::{NoteEvent, Provenance, Track};
use kontrapunkt_music::structure::SectionType;
use pretty_assertions::assert_eq;

fn config(
    form: FormType,
    key: &str,
    voices: u8,
    seed: u64,
    character: Character,
) -> GeneratorConfig {
    GeneratorConfig {
        form,
        key: key.parse().unwrap(),
        num_voices: voices,
        bpm: 72,
        seed,
        character,
        ..Default::default()
    }
}

fn note_count(tracks: &[Track]) -> usize {
    tracks.iter().map(|t| t.notes.len()).sum()
}

fn assert_well_formed(tracks: &[Track]) {
    for t in tracks {
        for w in t.notes.windows(2) {
            assert!(w[0].start_tick <= w[1].start_tick, "{}: unsorted", t.name);
            assert!(
                w[0].end_tick() <= w[1].start_tick,
                "{}: overlap at {}",
                t.name,
                w[1].start_tick
            );
        }
        assert!(t.notes.iter().all(|n| n.pitch <= 127 && n.duration > 0));
    }
}

#[test]
fn three_voice_fugue_in_c_major() {
    let cfg = config(FormType::Fugue, "C_major", 3, 42, Character::Severe);
    let a = generate(&cfg);
    assert!(a.success, "{}", a.error_message);
    assert_eq!(a.tracks.len(), 3);
    assert_eq!(a.seed_used, 42);

    let structure = a.structure.as_ref().unwrap();
    assert_eq!(
        structure.sections.first().unwrap().section_type,
        SectionType::Exposition
    );
    assert_eq!(
        structure.sections.last().unwrap().section_type,
        SectionType::Coda
    );
    assert!(structure.count(SectionType::Episode) >= 1);
    assert!(structure.count(SectionType::Stretto) >= 1);

    let b = generate(&cfg);
    for (ta, tb) in a.tracks.iter().zip(&b.tracks) {
        assert_eq!(ta.notes, tb.notes);
    }
    assert_eq!(a.total_duration_ticks, b.total_duration_ticks);
    assert_well_formed(&a.tracks);
}

#[test]
fn four_voice_organ_fugue_in_g_minor() {
    let cfg = config(FormType::Fugue, "G_minor", 4, 12345, Character::Noble);
    let r = generate(&cfg);
    assert!(r.success, "{}", r.error_message);
    assert_eq!(r.tracks.len(), 4);
    assert_eq!(r.tracks[3].name, "Pedal");
    assert_eq!(r.tracks[3].channel, 3);
    assert!(r.tracks.iter().flat_map(|t| &t.notes).all(|n| (24..=96).contains(&n.pitch)));
    assert!(r.structure.as_ref().unwrap().validate().is_empty());
    assert_well_formed(&r.tracks);
}

#[test]
fn prelude_and_fugue_is_longer_than_the_fugue() {
    let fugue = generate(&config(FormType::Fugue, "C_major", 3, 42, Character::Severe));
    let both = generate(&config(FormType::PreludeAndFugue, "C_major", 3, 42, Character::Severe));
    assert!(both.success, "{}", both.error_message);
    assert!(both.total_duration_ticks > fugue.total_duration_ticks);
    assert!(both.tempo_events.len() >= 2);
    assert_eq!(both.tempo_events[0].tick, 0);
    assert!(note_count(&both.tracks) > note_count(&fugue.tracks));
    assert_well_formed(&both.tracks);
}

#[test]
fn zero_seed_draws_from_entropy() {
    let cfg = config(FormType::Fugue, "C_major", 2, 0, Character::Severe);
    let r = generate(&cfg);
    assert!(r.success, "{}", r.error_message);
    assert_ne!(r.seed_used, 0);
}

#[test]
fn gate_never_passes_critical_violations() {
    for seed in 1..=6 {
        let r = generate(&config(FormType::Fugue, "C_major", 3, seed, Character::Severe));
        assert!(r.success, "seed {seed}: {}", r.error_message);
        let q = &r.quality;
        if q.voice_crossings + q.parallel_perfects + q.tritone_leaps > 0 {
            assert!(!q.passed, "seed {seed}: {q:?}");
            assert!(q.critical_issues > 0);
        }
        if q.passed {
            assert_eq!(q.critical_issues, 0, "seed {seed}");
            assert_eq!(q.integrity_issues, 0, "seed {seed}");
        }
    }
}

#[test]
fn parallel_fifths_are_counted() {
    let mut notes = Vec::new();
    let fifths = [(67u8, 60u8), (69, 62), (71, 64), (72, 65)];
    for (i, (upper, lower)) in fifths.into_iter().enumerate() {
        let t = i as u32 * 480;
        notes.push(NoteEvent::new(t, 480, upper, 0, Provenance::FreeCounterpoint));
        notes.push(NoteEvent::new(t, 480, lower, 1, Provenance::FreeCounterpoint));
    }
    let report = analyze_counterpoint(&notes);
    assert!(report.parallel_perfect_count >= 2);
    assert_eq!(report.structural_parallel_count, 0);

    for n in &mut notes {
        n.provenance = if n.voice_id == 0 {
            Provenance::FugueSubject
        } else {
            Provenance::FugueAnswer
        };
    }
    let report = analyze_counterpoint(&notes);
    assert!(report.structural_parallel_count >= 2);
}

#[test]
fn overlap_in_one_voice_is_rejected() {
    let mut state = CounterpointState::new();
    state.register_voice(0, "upper", 55, 81).unwrap();
    state.register_voice(1, "lower", 40, 64).unwrap();
    state
        .add_note(NoteEvent::new(0, 960, 60, 0, Provenance::FugueSubject))
        .unwrap();
    let clash = NoteEvent::new(480, 480, 62, 0, Provenance::FreeCounterpoint);
    assert!(matches!(state.add_note(clash), Err(CounterpointError::Overlap { voice: 0, .. })));
    let other = NoteEvent {
        voice_id: 1,
        ..clash
    };
    assert!(state.add_note(other).is_ok());
}

#[test]
fn voice_counts_are_clamped() {
    let low = generate(&config(FormType::Fugue, "D_minor", 1, 7, Character::Restless));
    assert!(low.success, "{}", low.error_message);
    assert_eq!(low.tracks.len(), 2);
    let high = generate(&config(FormType::Fugue, "D_minor", 10, 7, Character::Restless));
    assert!(high.success, "{}", high.error_message);
    assert_eq!(high.tracks.len(), 5);
    // The fifth organ voice shares the Great's channel.
    assert_eq!(high.tracks[4].channel, 0);
    assert_eq!(high.tracks[4].name, "Manual I (Great)");
}

#[test]
fn zero_bpm_is_a_config_error() {
    let mut cfg = config(FormType::Fugue, "C_major", 3, 42, Character::Severe);
    cfg.bpm = 0;
    let r = generate(&cfg);
    assert!(!r.success);
    assert!(r.tracks.is_empty());
    assert!(r.error_message.starts_with("invalid configuration"));
}

#[test]
fn other_instruments_render() {
    for instrument in [
        Instrument::Piano,
        Instrument::Cello,
        Instrument::Harpsichord,
        Instrument::Guitar,
    ] {
        let mut cfg = config(FormType::Fugue, "E_minor", 3, 99, Character::Playful);
        cfg.instrument = instrument;
        let r = generate(&cfg);
        assert!(r.success, "{instrument}: {}", r.error_message);
        assert_well_formed(&r.tracks);
    }
}

#[test]
fn json_summary_and_midi_file() {
    let mut cfg = config(FormType::Fugue, "F_major", 3, 5, Character::Playful);
    cfg.analyze = true;
    let r = generate(&cfg);
    assert!(r.success, "{}", r.error_message);
    let json = serde_json::to_value(&r).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["seed_used"], 5);
    assert!(json["analysis"]["counterpoint"]["compliance_rate"].is_number());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fugue.mid");
    kontrapunkt_music::midi::write_midi(&r, &path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    let smf = midly::Smf::parse(&bytes).unwrap();
    assert_eq!(smf.tracks.len(), r.tracks.len() + 1);
}
