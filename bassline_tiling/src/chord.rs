// Chord symbols and the degree-compatibility oracle.
//
// A chord is a root pitch class plus a quality. Each quality reduces to three
// structural degrees (third, fifth, seventh/sixth) and two chords are
// compared degree by degree: a pattern recorded over Dm7 works over Dm9 but
// not over D7, because the thirds disagree.
//
// This module is read-only theory. The scorer (scoring.rs) consumes
// `harmonic_compatibility`, sequence.rs parses chord charts through
// `Chord::parse`, and fallback.rs asks for chord-tone intervals when it
// writes a bass walk.

use crate::error::{Result, TilingError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A pitch class, 0 = C through 11 = B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PitchClass(u8);

impl PitchClass {
    pub const C: PitchClass = PitchClass(0);

    pub fn new(pc: u8) -> Self {
        PitchClass(pc % 12)
    }

    /// Pitch class of a MIDI note number.
    pub fn of_pitch(pitch: u8) -> Self {
        PitchClass(pitch % 12)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Upward interval in semitones (0..12) from `self` to `other`.
    pub fn interval_to(self, other: PitchClass) -> u8 {
        (other.0 + 12 - self.0) % 12
    }

    pub fn transpose(self, semitones: i16) -> Self {
        PitchClass((self.0 as i16 + semitones).rem_euclid(12) as u8)
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "C",
            1 => "Db",
            2 => "D",
            3 => "Eb",
            4 => "E",
            5 => "F",
            6 => "Gb",
            7 => "G",
            8 => "Ab",
            9 => "A",
            10 => "Bb",
            _ => "B",
        }
    }
}

/// Quality of the third.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Third {
    Minor,
    Major,
}

/// Quality of the fifth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fifth {
    Diminished,
    Perfect,
    Augmented,
}

/// The "color" degree above the fifth: added sixth or one of the sevenths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seventh {
    Sixth,
    Diminished,
    Minor,
    Major,
}

/// Structural degrees of a chord quality. `None` means the degree is absent
/// (sus chords have no third, triads have no seventh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Degrees {
    pub third: Option<Third>,
    pub fifth: Option<Fifth>,
    pub seventh: Option<Seventh>,
}

/// Supported chord qualities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
    Dominant7,
    Dominant9,
    Dominant13,
    Major7,
    Major9,
    Minor7,
    Minor9,
    MinorMajor7,
    Sixth,
    Minor6,
    HalfDiminished,
    Diminished,
    Diminished7,
    Augmented,
    Sus2,
    Sus4,
    SevenSus4,
}

impl ChordQuality {
    /// Parse the text after the root (and accidentals) of a chord symbol.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let quality = match suffix {
            "" | "maj" | "M" => ChordQuality::Major,
            "m" | "min" | "-" => ChordQuality::Minor,
            "7" => ChordQuality::Dominant7,
            "9" => ChordQuality::Dominant9,
            "13" => ChordQuality::Dominant13,
            "maj7" | "M7" | "^7" | "^" => ChordQuality::Major7,
            "maj9" | "M9" | "^9" => ChordQuality::Major9,
            "m7" | "min7" | "-7" => ChordQuality::Minor7,
            "m9" | "min9" | "-9" => ChordQuality::Minor9,
            "mmaj7" | "mM7" | "m^7" | "-^7" => ChordQuality::MinorMajor7,
            "6" => ChordQuality::Sixth,
            "m6" | "min6" | "-6" => ChordQuality::Minor6,
            "m7b5" | "-7b5" | "ø" | "ø7" => ChordQuality::HalfDiminished,
            "dim" | "o" => ChordQuality::Diminished,
            "dim7" | "o7" => ChordQuality::Diminished7,
            "aug" | "+" => ChordQuality::Augmented,
            "sus2" => ChordQuality::Sus2,
            "sus4" | "sus" => ChordQuality::Sus4,
            "7sus4" | "7sus" => ChordQuality::SevenSus4,
            _ => return None,
        };
        Some(quality)
    }

    /// Canonical suffix used when printing a chord.
    pub fn suffix(self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Dominant9 => "9",
            ChordQuality::Dominant13 => "13",
            ChordQuality::Major7 => "maj7",
            ChordQuality::Major9 => "maj9",
            ChordQuality::Minor7 => "m7",
            ChordQuality::Minor9 => "m9",
            ChordQuality::MinorMajor7 => "mmaj7",
            ChordQuality::Sixth => "6",
            ChordQuality::Minor6 => "m6",
            ChordQuality::HalfDiminished => "m7b5",
            ChordQuality::Diminished => "dim",
            ChordQuality::Diminished7 => "dim7",
            ChordQuality::Augmented => "aug",
            ChordQuality::Sus2 => "sus2",
            ChordQuality::Sus4 => "sus4",
            ChordQuality::SevenSus4 => "7sus4",
        }
    }

    pub fn degrees(self) -> Degrees {
        use ChordQuality::*;
        let (third, fifth, seventh) = match self {
            Major => (Some(Third::Major), Some(Fifth::Perfect), None),
            Minor => (Some(Third::Minor), Some(Fifth::Perfect), None),
            Dominant7 | Dominant9 | Dominant13 => {
                (Some(Third::Major), Some(Fifth::Perfect), Some(Seventh::Minor))
            }
            Major7 | Major9 => (Some(Third::Major), Some(Fifth::Perfect), Some(Seventh::Major)),
            Minor7 | Minor9 => (Some(Third::Minor), Some(Fifth::Perfect), Some(Seventh::Minor)),
            MinorMajor7 => (Some(Third::Minor), Some(Fifth::Perfect), Some(Seventh::Major)),
            Sixth => (Some(Third::Major), Some(Fifth::Perfect), Some(Seventh::Sixth)),
            Minor6 => (Some(Third::Minor), Some(Fifth::Perfect), Some(Seventh::Sixth)),
            HalfDiminished => {
                (Some(Third::Minor), Some(Fifth::Diminished), Some(Seventh::Minor))
            }
            Diminished => (Some(Third::Minor), Some(Fifth::Diminished), None),
            Diminished7 => {
                (Some(Third::Minor), Some(Fifth::Diminished), Some(Seventh::Diminished))
            }
            Augmented => (Some(Third::Major), Some(Fifth::Augmented), None),
            Sus2 | Sus4 => (None, Some(Fifth::Perfect), None),
            SevenSus4 => (None, Some(Fifth::Perfect), Some(Seventh::Minor)),
        };
        Degrees { third, fifth, seventh }
    }

    /// Semitones from the root to the chord tone that stands in for the
    /// third (the suspended tone for sus chords).
    pub fn third_interval(self) -> u8 {
        match self.degrees().third {
            Some(Third::Minor) => 3,
            Some(Third::Major) => 4,
            None if self == ChordQuality::Sus2 => 2,
            None => 5,
        }
    }

    pub fn fifth_interval(self) -> u8 {
        match self.degrees().fifth {
            Some(Fifth::Diminished) => 6,
            Some(Fifth::Augmented) => 8,
            _ => 7,
        }
    }

    /// Semitones to the sixth/seventh, if the quality has one.
    pub fn seventh_interval(self) -> Option<u8> {
        self.degrees().seventh.map(|s| match s {
            Seventh::Sixth | Seventh::Diminished => 9,
            Seventh::Minor => 10,
            Seventh::Major => 11,
        })
    }
}

/// A chord symbol: root, quality and an optional slash bass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chord {
    pub root: PitchClass,
    pub quality: ChordQuality,
    /// Slash bass, kept for display. Matching uses the root only.
    pub bass: Option<PitchClass>,
}

impl Chord {
    pub fn new(root: PitchClass, quality: ChordQuality) -> Self {
        Chord { root, quality, bass: None }
    }

    /// Parse a chord symbol such as `Bb7`, `F#m7b5`, `Cmaj7/E` or `Gsus`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (symbol, bass) = match text.split_once('/') {
            Some((s, b)) => (s, Some(parse_note_name(b, text)?.0)),
            None => (text, None),
        };
        let (root, rest) = parse_note_name(symbol, text)?;
        let quality = ChordQuality::from_suffix(rest).ok_or_else(|| {
            TilingError::ChordParse(format!("unknown chord quality in '{}'", text))
        })?;
        Ok(Chord { root, quality, bass })
    }
}

/// Parse a leading note name (letter plus accidentals). Returns the pitch
/// class and the remaining text.
fn parse_note_name<'a>(text: &'a str, whole: &str) -> Result<(PitchClass, &'a str)> {
    let mut chars = text.char_indices();
    let base: i16 = match chars.next() {
        Some((_, 'C')) => 0,
        Some((_, 'D')) => 2,
        Some((_, 'E')) => 4,
        Some((_, 'F')) => 5,
        Some((_, 'G')) => 7,
        Some((_, 'A')) => 9,
        Some((_, 'B')) => 11,
        _ => return Err(TilingError::ChordParse(format!("missing root note in '{}'", whole))),
    };
    let mut offset = 0i16;
    let mut rest_start = 1;
    for (i, c) in chars {
        match c {
            '#' | '♯' => offset += 1,
            'b' | '♭' => offset -= 1,
            _ => {
                rest_start = i;
                break;
            }
        }
        rest_start = i + c.len_utf8();
    }
    Ok((PitchClass::new(0).transpose(base + offset), &text[rest_start..]))
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.root.name(), self.quality.suffix())?;
        if let Some(bass) = self.bass {
            write!(f, "/{}", bass.name())?;
        }
        Ok(())
    }
}

/// Penalty for each structural degree present in only one of the chords.
const MISSING_DEGREE_PENALTY: f64 = 15.0;
/// Penalty for different qualities that share all degrees (e.g. 7 vs 9).
const EXTENSION_PENALTY: f64 = 10.0;
/// Floor for compatible but loosely related chords.
const MIN_COMPATIBLE: f64 = 25.0;

/// How well a pattern recorded over `source` fits `target`, in [0, 100].
///
/// Roots are not compared: callers pair chords whose relative roots already
/// agree through the root profile. Returns 0 when a third, fifth or seventh
/// is present in both chords with different qualities.
pub fn harmonic_compatibility(source: &Chord, target: &Chord) -> f64 {
    if source.quality == target.quality {
        return 100.0;
    }
    let a = source.quality.degrees();
    let b = target.quality.degrees();

    let mut penalty = EXTENSION_PENALTY;
    let slots = [
        compare_degree(a.third, b.third),
        compare_degree(a.fifth, b.fifth),
        compare_degree(a.seventh, b.seventh),
    ];
    for slot in slots {
        match slot {
            DegreeMatch::Conflict => return 0.0,
            DegreeMatch::OneSided => penalty += MISSING_DEGREE_PENALTY,
            DegreeMatch::Agree => {}
        }
    }
    (100.0 - penalty).max(MIN_COMPATIBLE)
}

enum DegreeMatch {
    Agree,
    OneSided,
    Conflict,
}

fn compare_degree<T: PartialEq>(a: Option<T>, b: Option<T>) -> DegreeMatch {
    match (a, b) {
        (Some(x), Some(y)) if x != y => DegreeMatch::Conflict,
        (Some(_), None) | (None, Some(_)) => DegreeMatch::OneSided,
        _ => DegreeMatch::Agree,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_symbols() {
        let c = Chord::parse("Bb7").unwrap();
        assert_eq!(c.root, PitchClass::new(10));
        assert_eq!(c.quality, ChordQuality::Dominant7);

        let c = Chord::parse("F#m7b5").unwrap();
        assert_eq!(c.root, PitchClass::new(6));
        assert_eq!(c.quality, ChordQuality::HalfDiminished);

        let c = Chord::parse("C").unwrap();
        assert_eq!(c.quality, ChordQuality::Major);
        assert_eq!(c.root, PitchClass::C);
    }

    #[test]
    fn test_parse_slash_chord() {
        let c = Chord::parse("Cmaj7/E").unwrap();
        assert_eq!(c.quality, ChordQuality::Major7);
        assert_eq!(c.bass, Some(PitchClass::new(4)));
        assert_eq!(c.to_string(), "Cmaj7/E");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Chord::parse("H7").is_err());
        assert!(Chord::parse("Cxyz").is_err());
        assert!(Chord::parse("").is_err());
    }

    #[test]
    fn test_identical_quality_is_full_match() {
        let a = Chord::parse("Dm7").unwrap();
        let b = Chord::parse("Em7").unwrap();
        assert_eq!(harmonic_compatibility(&a, &b), 100.0);
    }

    #[test]
    fn test_conflicting_third_rejects() {
        let minor = Chord::parse("Dm7").unwrap();
        let dominant = Chord::parse("D7").unwrap();
        assert_eq!(harmonic_compatibility(&minor, &dominant), 0.0);
    }

    #[test]
    fn test_conflicting_seventh_rejects() {
        let maj7 = Chord::parse("Cmaj7").unwrap();
        let dom7 = Chord::parse("C7").unwrap();
        assert_eq!(harmonic_compatibility(&maj7, &dom7), 0.0);
    }

    #[test]
    fn test_extension_and_missing_degree_penalties() {
        let c7 = Chord::parse("C7").unwrap();
        let c9 = Chord::parse("C9").unwrap();
        assert_eq!(harmonic_compatibility(&c7, &c9), 90.0);

        // Triad vs seventh chord: seventh present on one side only.
        let c = Chord::parse("C").unwrap();
        assert_eq!(harmonic_compatibility(&c, &c7), 75.0);

        // Sus4 lacks the third, seventh agrees.
        let sus = Chord::parse("C7sus4").unwrap();
        assert_eq!(harmonic_compatibility(&sus, &c7), 75.0);
    }

    #[test]
    fn test_chord_tone_intervals() {
        assert_eq!(ChordQuality::Minor7.third_interval(), 3);
        assert_eq!(ChordQuality::Sus4.third_interval(), 5);
        assert_eq!(ChordQuality::HalfDiminished.fifth_interval(), 6);
        assert_eq!(ChordQuality::Major7.seventh_interval(), Some(11));
        assert_eq!(ChordQuality::Major.seventh_interval(), None);
    }
}
