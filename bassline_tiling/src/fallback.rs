// Fallback synthesizer: a plain bass line for bars no recorded source fits.
//
// The engine calls this for each untiled zone left after its strategy
// passes, registers the result in the pattern database and offers it to the
// candidate store, so the next pass can place it like any recorded source.
//
// Two styles, both deterministic:
// - Every bar holds two chords: a skeletal line, root then fifth per chord.
// - Otherwise a walk per chord: root, third (fourth for sus chords), fifth,
//   and on the chord's last beat a chromatic approach from a semitone below
//   the next root. Longer chords cycle the chord tones.
// Pitches are kept inside the given range by octave folding.

use crate::chord::{Chord, PitchClass};
use crate::sequence::{BarRange, ChordSequence};
use crate::source::{
    NoteEvent, PatternSource, Phrase, PitchRange, SourceId, SourceOrigin, TICKS_PER_BEAT,
    Transposability,
};

/// A chord with its absolute start beat and length in beats, within a zone.
struct Span {
    chord: Chord,
    start: u32,
    beats: u32,
}

fn spans(zone: &ChordSequence) -> Vec<Span> {
    let bpb = zone.beats_per_bar() as u32;
    let mut out = Vec::new();
    for (i, bar) in zone.bars().iter().enumerate() {
        let bar_start = i as u32 * bpb;
        for (j, tc) in bar.chords.iter().enumerate() {
            let end = bar.chords.get(j + 1).map_or(bpb, |next| next.beat as u32);
            let start = tc.beat as u32;
            out.push(Span {
                chord: tc.chord,
                start: bar_start + start,
                beats: end.saturating_sub(start).max(1),
            });
        }
    }
    out
}

/// Fold `pitch` by octaves into `range`.
fn fold(pitch: i16, range: PitchRange) -> u8 {
    let mut p = pitch;
    while p > range.high as i16 && p - 12 >= range.low as i16 {
        p -= 12;
    }
    while p < range.low as i16 {
        p += 12;
    }
    p.clamp(0, 127) as u8
}

fn root_pitch(root: PitchClass, range: PitchRange) -> i16 {
    range.lowest_of(root) as i16
}

fn skeletal(spans: &[Span], range: PitchRange) -> Vec<NoteEvent> {
    let mut notes = Vec::new();
    for span in spans {
        let root = root_pitch(span.chord.root, range);
        let fifth = root + span.chord.quality.fifth_interval() as i16;
        let start = span.start * TICKS_PER_BEAT;
        if span.beats == 1 {
            notes.push(NoteEvent::new(fold(root, range), start, TICKS_PER_BEAT));
            continue;
        }
        notes.push(NoteEvent::new(fold(root, range), start, TICKS_PER_BEAT));
        notes.push(NoteEvent::new(
            fold(fifth, range),
            start + TICKS_PER_BEAT,
            (span.beats - 1) * TICKS_PER_BEAT,
        ));
    }
    notes
}

fn walk(spans: &[Span], next_root: Option<PitchClass>, range: PitchRange) -> Vec<NoteEvent> {
    let mut notes = Vec::new();
    for (i, span) in spans.iter().enumerate() {
        let root = root_pitch(span.chord.root, range);
        let quality = span.chord.quality;
        let tones = [
            root,
            root + quality.third_interval() as i16,
            root + quality.fifth_interval() as i16,
        ];
        let upcoming = spans.get(i + 1).map(|s| s.chord.root).or(next_root);
        for beat in 0..span.beats {
            let pitch = match upcoming {
                Some(next) if span.beats > 1 && beat == span.beats - 1 => {
                    root_pitch(next, range) - 1
                }
                _ => tones[beat as usize % tones.len()],
            };
            let position = (span.start + beat) * TICKS_PER_BEAT;
            notes.push(NoteEvent::new(fold(pitch, range), position, TICKS_PER_BEAT));
        }
    }
    notes
}

/// Build a synthesized source over `zone` (a zero-based chord slice).
/// `next_root` is the root of the chord following the zone, if any; the line
/// leads into it and it becomes the source's target note.
pub fn synthesize(
    zone: &ChordSequence,
    id: SourceId,
    next_root: Option<PitchClass>,
    range: PitchRange,
) -> PatternSource {
    let spans = spans(zone);
    let two_per_bar = !zone.is_empty() && zone.bars().iter().all(|b| b.chords.len() == 2);
    let notes = if two_per_bar {
        skeletal(&spans, range)
    } else {
        walk(&spans, next_root, range)
    };
    let target_note = next_root.map(|r| range.lowest_of(r));
    PatternSource::new(
        id,
        zone.clone(),
        Phrase::new(notes),
        target_note,
        Transposability::Range(range),
    )
    .with_origin(SourceOrigin::Synthesized)
}

/// Cut `zone` into chunks of at most `max` bars, largest first. A trailing
/// remainder shorter than `min` is dropped.
pub fn split_zone(zone: BarRange, min: usize, max: usize) -> Vec<BarRange> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut from = zone.from;
    while from <= zone.to {
        let size = (zone.to - from + 1).min(max);
        if size >= min {
            chunks.push(BarRange::sized(from, size));
        }
        from += size;
    }
    chunks.sort_by(|a, b| b.len().cmp(&a.len()).then(a.from.cmp(&b.from)));
    chunks
}
