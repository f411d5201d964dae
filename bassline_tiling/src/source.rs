// Pattern sources: recorded (or synthesized) bass fragments of 1-4 bars.
//
// A source is a phrase of note events anchored at its own bar 0, together
// with the chords it was recorded over. The chords give the root profile
// the database indexes it by, and the chord-by-chord comparison the scorer
// runs against a target slice. Placing a source transposes its phrase by the
// smallest shift that moves its first root onto the target's first root.
//
// Sources are shared read-only across requests behind `Arc` (database.rs).

use crate::chord::PitchClass;
use crate::sequence::ChordSequence;
use serde::{Deserialize, Serialize};
use std::fmt;

/// MIDI-style resolution for note positions and durations.
pub const TICKS_PER_BEAT: u32 = 480;

/// Largest pattern, in bars.
pub const MAX_SOURCE_SIZE: usize = 4;

/// Points lost per semitone of transposition.
const SHIFT_PENALTY: f64 = 4.0;
/// Points lost per semitone a transposed phrase leaves the playable range.
const OUT_OF_RANGE_PENALTY: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single note. Positions are ticks from the start of the owning phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub position: u32,
    pub duration: u32,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn new(pitch: u8, position: u32, duration: u32) -> Self {
        NoteEvent { pitch, position, duration, velocity: 90 }
    }

    pub fn end(&self) -> u32 {
        self.position + self.duration
    }

    /// Same note moved by `shift` semitones and `offset` ticks.
    pub fn moved(self, shift: i16, offset: u32) -> Self {
        NoteEvent {
            pitch: (self.pitch as i16 + shift).clamp(0, 127) as u8,
            position: self.position + offset,
            ..self
        }
    }
}

/// An ordered list of notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phrase {
    pub notes: Vec<NoteEvent>,
}

impl Phrase {
    pub fn new(mut notes: Vec<NoteEvent>) -> Self {
        notes.sort_by_key(|n| n.position);
        Phrase { notes }
    }

    /// Consecutive quarter notes starting at tick 0.
    pub fn quarters(pitches: &[u8]) -> Self {
        let notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| NoteEvent::new(p, i as u32 * TICKS_PER_BEAT, TICKS_PER_BEAT))
            .collect();
        Phrase { notes }
    }

    pub fn push(&mut self, note: NoteEvent) {
        self.notes.push(note);
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn first_pitch(&self) -> Option<u8> {
        self.notes.first().map(|n| n.pitch)
    }

    pub fn last_pitch(&self) -> Option<u8> {
        self.notes.last().map(|n| n.pitch)
    }

    /// Lowest and highest pitch, if any notes.
    pub fn pitch_span(&self) -> Option<(u8, u8)> {
        let low = self.notes.iter().map(|n| n.pitch).min()?;
        let high = self.notes.iter().map(|n| n.pitch).max()?;
        Some((low, high))
    }

    pub fn end(&self) -> u32 {
        self.notes.iter().map(|n| n.end()).max().unwrap_or(0)
    }

    /// Successive melodic intervals in semitones.
    pub fn contour(&self) -> Vec<i16> {
        self.notes
            .windows(2)
            .map(|w| w[1].pitch as i16 - w[0].pitch as i16)
            .collect()
    }
}

/// An inclusive MIDI pitch range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchRange {
    pub low: u8,
    pub high: u8,
}

impl PitchRange {
    /// E1..G3, the comfortable register of an upright bass.
    pub const BASS: PitchRange = PitchRange { low: 28, high: 55 };

    /// Lowest pitch at or above `low` with pitch class `pc`.
    pub fn lowest_of(&self, pc: PitchClass) -> u8 {
        let offset = PitchClass::of_pitch(self.low).interval_to(pc);
        self.low + offset
    }

    /// How many semitones `[low, high]` sticks out of this range.
    pub fn overshoot(&self, low: i16, high: i16) -> i16 {
        (self.low as i16 - low).max(0) + (high - self.high as i16).max(0)
    }
}

impl Default for PitchRange {
    fn default() -> Self {
        PitchRange::BASS
    }
}

/// How willing a source is to be moved to another root, in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transposability {
    /// Computed from the transposition distance and how far the moved
    /// phrase leaves the playable range.
    Range(PitchRange),
    /// Fixed score per target root pitch class.
    Table([u8; 12]),
}

impl Default for Transposability {
    fn default() -> Self {
        Transposability::Range(PitchRange::BASS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceOrigin {
    Recorded,
    Synthesized,
}

/// A pattern source. See the module comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSource {
    pub id: SourceId,
    /// Length in bars, equal to `chords.len()`.
    pub size: usize,
    pub root_profile: String,
    /// The harmony the phrase was recorded over, re-indexed from bar 0.
    pub chords: ChordSequence,
    pub phrase: Phrase,
    /// Pitch the phrase leads into after its last bar, if it has one.
    pub target_note: Option<u8>,
    pub transposability: Transposability,
    pub origin: SourceOrigin,
}

impl PatternSource {
    /// Build a source over `chords`. The root profile is derived from them;
    /// a source over chordless bars gets an empty profile and fails
    /// `validate`.
    pub fn new(
        id: SourceId,
        chords: ChordSequence,
        phrase: Phrase,
        target_note: Option<u8>,
        transposability: Transposability,
    ) -> Self {
        let size = chords.len();
        let root_profile = chords
            .full_range()
            .and_then(|r| chords.root_profile(r))
            .unwrap_or_default();
        PatternSource {
            id,
            size,
            root_profile,
            chords,
            phrase,
            target_note,
            transposability,
            origin: SourceOrigin::Recorded,
        }
    }

    pub fn with_origin(mut self, origin: SourceOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Root of the first chord the source was recorded over.
    pub fn root(&self) -> PitchClass {
        self.chords
            .first_chord(self.chords.first_bar())
            .map(|c| c.root)
            .unwrap_or(PitchClass::C)
    }

    /// Length of the source in ticks.
    pub fn length_ticks(&self) -> u32 {
        self.size as u32 * self.chords.beats_per_bar() as u32 * TICKS_PER_BEAT
    }

    /// Smallest shift in -6..=5 semitones taking this source's root to `root`.
    pub fn transposition_to(&self, root: PitchClass) -> i8 {
        let up = self.root().interval_to(root) as i8;
        if up > 5 { up - 12 } else { up }
    }

    /// Score in [0, 100] for playing this source over a slice rooted on `root`.
    pub fn transposability(&self, root: PitchClass) -> f64 {
        match self.transposability {
            Transposability::Table(table) => (table[root.value() as usize] as f64).min(100.0),
            Transposability::Range(range) => {
                let shift = self.transposition_to(root) as i16;
                let overshoot = self
                    .phrase
                    .pitch_span()
                    .map(|(low, high)| range.overshoot(low as i16 + shift, high as i16 + shift))
                    .unwrap_or(0);
                let score = 100.0
                    - SHIFT_PENALTY * shift.abs() as f64
                    - OUT_OF_RANGE_PENALTY * overshoot as f64;
                score.clamp(0.0, 100.0)
            }
        }
    }

    /// Identity distance used to avoid audible repetition: 0 for the same
    /// source, otherwise 1 plus the summed difference of melodic contours
    /// (a missing interval counts as an octave).
    pub fn distance(&self, other: &PatternSource) -> u32 {
        if self.id == other.id {
            return 0;
        }
        let a = self.phrase.contour();
        let b = other.phrase.contour();
        let paired: u32 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).unsigned_abs() as u32)
            .sum();
        let unpaired = a.len().abs_diff(b.len()) as u32 * 12;
        1 + paired + unpaired
    }

    /// Same musical content, ignoring id and origin.
    pub fn is_equivalent(&self, other: &PatternSource) -> bool {
        self.size == other.size
            && self.root_profile == other.root_profile
            && self.chords == other.chords
            && self.phrase == other.phrase
            && self.target_note == other.target_note
    }

    /// Structural checks run before a source enters the database.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.size == 0 || self.size > MAX_SOURCE_SIZE {
            return Err(format!("size {} outside 1..={}", self.size, MAX_SOURCE_SIZE));
        }
        if self.chords.len() != self.size {
            return Err(format!("{} chord bars for size {}", self.chords.len(), self.size));
        }
        if self.root_profile.is_empty() {
            return Err("no root profile (bar without chords)".to_string());
        }
        if self.phrase.is_empty() {
            return Err("empty phrase".to_string());
        }
        if self.phrase.notes.iter().any(|n| n.position >= self.length_ticks()) {
            return Err("note starts after the end of the source".to_string());
        }
        Ok(())
    }
}
