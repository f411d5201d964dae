// Chord sequences: the harmonic timeline a bass line is tiled over.
//
// A sequence is a run of consecutive bars, each holding one or two timed
// chords and a "usable" flag. Unusable bars (pickups, ambiguous or overly
// busy bars) are never covered by a placement. Sequences are built once per
// request and then only read.
//
// The root profile is the database key: the roots of a bar range expressed
// as semitone offsets from the first root, so a ii-V in C and a ii-V in Eb
// share the key `0|5`. Pattern sources carry their own zero-based sequence
// (see source.rs), which is how a source and a target slice get compared
// chord by chord in scoring.rs.

use crate::chord::Chord;
use crate::error::{Result, TilingError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Most chords a bar may hold and still be matchable.
pub const MAX_CHORDS_PER_BAR: usize = 2;

/// An inclusive range of bar indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarRange {
    pub from: usize,
    pub to: usize,
}

impl BarRange {
    /// # Panics
    /// Panics if `to < from`.
    pub fn new(from: usize, to: usize) -> Self {
        assert!(from <= to, "BarRange: from ({}) must not exceed to ({})", from, to);
        BarRange { from, to }
    }

    /// The range of `size` bars starting at `from`.
    pub fn sized(from: usize, size: usize) -> Self {
        BarRange::new(from, from + size.max(1) - 1)
    }

    pub fn single(bar: usize) -> Self {
        BarRange { from: bar, to: bar }
    }

    pub fn len(&self) -> usize {
        self.to - self.from + 1
    }

    pub fn contains(&self, bar: usize) -> bool {
        bar >= self.from && bar <= self.to
    }

    pub fn intersects(&self, other: &BarRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    pub fn bars(&self) -> std::ops::RangeInclusive<usize> {
        self.from..=self.to
    }
}

impl fmt::Display for BarRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}]", self.from, self.to)
    }
}

/// A chord sounding from `beat` (0-based, within its bar) to the next chord
/// or the end of the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedChord {
    pub beat: u8,
    pub chord: Chord,
}

/// One bar of the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub index: usize,
    pub chords: Vec<TimedChord>,
    pub usable: bool,
}

/// An ordered run of bars starting at `first_bar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordSequence {
    beats_per_bar: u8,
    first_bar: usize,
    bars: Vec<Bar>,
}

impl ChordSequence {
    /// An empty sequence in the given meter, starting at bar 0.
    pub fn new(beats_per_bar: u8) -> Self {
        ChordSequence {
            beats_per_bar: beats_per_bar.max(1),
            first_bar: 0,
            bars: Vec::new(),
        }
    }

    /// Append a bar. Bars with no chords or more than two chords are stored
    /// as unusable whatever `usable` says.
    pub fn push_bar(&mut self, chords: Vec<TimedChord>, usable: bool) -> usize {
        let index = self.end_bar();
        let usable = usable && !chords.is_empty() && chords.len() <= MAX_CHORDS_PER_BAR;
        self.bars.push(Bar { index, chords, usable });
        index
    }

    /// Append a bar whose chords split it evenly.
    pub fn push_chords(&mut self, chords: &[Chord], usable: bool) -> usize {
        let n = chords.len().max(1);
        let timed = chords
            .iter()
            .enumerate()
            .map(|(i, &chord)| TimedChord {
                beat: (i * self.beats_per_bar as usize / n) as u8,
                chord,
            })
            .collect();
        self.push_bar(timed, usable)
    }

    /// Parse a chord chart: `|` separates bars, whitespace separates chords
    /// within a bar, `%` repeats the previous bar and `?` (or an empty bar)
    /// marks an unusable bar.
    ///
    /// ```text
    /// Dm7 G7 | Cmaj7 | % | ? | A7
    /// ```
    pub fn parse(chart: &str, beats_per_bar: u8) -> Result<Self> {
        let mut seq = ChordSequence::new(beats_per_bar);
        let trimmed = chart.trim().trim_matches('|');
        if trimmed.trim().is_empty() {
            return Ok(seq);
        }
        for cell in trimmed.split('|') {
            let tokens: Vec<&str> = cell.split_whitespace().collect();
            match tokens.as_slice() {
                [] | ["?"] => {
                    seq.push_bar(Vec::new(), false);
                }
                ["%"] => {
                    let prev = seq.bars.last().cloned().ok_or_else(|| {
                        TilingError::ChordParse("'%' with no previous bar".to_string())
                    })?;
                    seq.push_bar(prev.chords, prev.usable);
                }
                _ => {
                    let chords = tokens
                        .iter()
                        .map(|t| Chord::parse(t))
                        .collect::<Result<Vec<_>>>()?;
                    seq.push_chords(&chords, true);
                }
            }
        }
        Ok(seq)
    }

    pub fn beats_per_bar(&self) -> u8 {
        self.beats_per_bar
    }

    pub fn first_bar(&self) -> usize {
        self.first_bar
    }

    /// One past the last bar index.
    pub fn end_bar(&self) -> usize {
        self.first_bar + self.bars.len()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bar(&self, index: usize) -> Option<&Bar> {
        index
            .checked_sub(self.first_bar)
            .and_then(|i| self.bars.get(i))
    }

    /// The range covering the whole sequence, if it has any bars.
    pub fn full_range(&self) -> Option<BarRange> {
        if self.bars.is_empty() {
            None
        } else {
            Some(BarRange::new(self.first_bar, self.end_bar() - 1))
        }
    }

    /// False for unusable bars and for indices outside the sequence.
    pub fn is_usable(&self, bar: usize) -> bool {
        self.bar(bar).is_some_and(|b| b.usable)
    }

    pub fn is_range_usable(&self, range: BarRange) -> bool {
        range.bars().all(|b| self.is_usable(b))
    }

    pub fn usable_bar_count(&self) -> usize {
        self.bars.iter().filter(|b| b.usable).count()
    }

    /// All chords of a range in playing order.
    pub fn chords_in(&self, range: BarRange) -> Vec<Chord> {
        range
            .bars()
            .filter_map(|b| self.bar(b))
            .flat_map(|bar| bar.chords.iter().map(|tc| tc.chord))
            .collect()
    }

    /// First chord of `bar`, if the bar exists and has one.
    pub fn first_chord(&self, bar: usize) -> Option<Chord> {
        self.bar(bar).and_then(|b| b.chords.first()).map(|tc| tc.chord)
    }

    /// Transposition-independent key for a range, e.g. `0,5|10`.
    ///
    /// Returns `None` when the range leaves the sequence or contains a bar
    /// without chords.
    pub fn root_profile(&self, range: BarRange) -> Option<String> {
        let first_root = self.first_chord(range.from)?.root;
        let mut bars = Vec::with_capacity(range.len());
        for index in range.bars() {
            let bar = self.bar(index)?;
            if bar.chords.is_empty() {
                return None;
            }
            let roots: Vec<String> = bar
                .chords
                .iter()
                .map(|tc| first_root.interval_to(tc.chord.root).to_string())
                .collect();
            bars.push(roots.join(","));
        }
        Some(bars.join("|"))
    }

    /// Copy of a range of bars. With `shift_to_zero` the copy is re-indexed
    /// to start at bar 0, otherwise it keeps the original indices. Bars
    /// outside the sequence are dropped.
    pub fn sub_sequence(&self, range: BarRange, shift_to_zero: bool) -> ChordSequence {
        let bars: Vec<Bar> = range.bars().filter_map(|b| self.bar(b)).cloned().collect();
        let first_bar = bars.first().map(|b| b.index).unwrap_or(range.from);
        let mut seq = ChordSequence {
            beats_per_bar: self.beats_per_bar,
            first_bar: if shift_to_zero { 0 } else { first_bar },
            bars,
        };
        if shift_to_zero {
            for (i, bar) in seq.bars.iter_mut().enumerate() {
                bar.index = i;
            }
        }
        seq
    }

    /// Append `other`'s bars after this sequence's last bar.
    pub fn merge(&mut self, other: &ChordSequence) -> Result<()> {
        if other.beats_per_bar != self.beats_per_bar {
            return Err(TilingError::InvalidParameter {
                name: "beats_per_bar",
                reason: format!(
                    "cannot merge a {}-beat sequence into a {}-beat one",
                    other.beats_per_bar, self.beats_per_bar
                ),
            });
        }
        for bar in &other.bars {
            let index = self.end_bar();
            self.bars.push(Bar { index, ..bar.clone() });
        }
        Ok(())
    }
}

impl fmt::Display for ChordSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<String> = self
            .bars
            .iter()
            .map(|bar| {
                if bar.chords.is_empty() {
                    return "?".to_string();
                }
                let names: Vec<String> = bar.chords.iter().map(|tc| tc.chord.to_string()).collect();
                let text = names.join(" ");
                if bar.usable { text } else { format!("({})", text) }
            })
            .collect();
        write!(f, "{}", cells.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chart() {
        let seq = ChordSequence::parse("Dm7 G7 | Cmaj7 | % | ? | A7", 4).unwrap();
        assert_eq!(seq.len(), 5);
        assert_eq!(seq.bars()[0].chords.len(), 2);
        assert_eq!(seq.bars()[0].chords[1].beat, 2);
        assert_eq!(seq.bars()[2].chords, seq.bars()[1].chords);
        assert!(!seq.is_usable(3));
        assert!(seq.is_usable(4));
        assert_eq!(seq.usable_bar_count(), 4);
    }

    #[test]
    fn test_busy_bar_is_unusable() {
        let seq = ChordSequence::parse("C F G | C", 4).unwrap();
        assert!(!seq.is_usable(0));
        assert!(seq.is_usable(1));
    }

    #[test]
    fn test_repeat_without_previous_bar_fails() {
        assert!(ChordSequence::parse("% | C", 4).is_err());
    }

    #[test]
    fn test_root_profile_is_transposition_independent() {
        let in_c = ChordSequence::parse("Dm7 | G7 | Cmaj7", 4).unwrap();
        let in_eb = ChordSequence::parse("Fm7 | Bb7 | Ebmaj7", 4).unwrap();
        let range = BarRange::new(0, 2);
        assert_eq!(in_c.root_profile(range), in_eb.root_profile(range));
        assert_eq!(in_c.root_profile(range).as_deref(), Some("0|5|10"));
    }

    #[test]
    fn test_root_profile_two_chords_per_bar() {
        let seq = ChordSequence::parse("Dm7 G7 | C", 4).unwrap();
        assert_eq!(seq.root_profile(BarRange::new(0, 1)).as_deref(), Some("0,5|10"));
    }

    #[test]
    fn test_root_profile_rejects_empty_bar() {
        let seq = ChordSequence::parse("C | ? | F", 4).unwrap();
        assert_eq!(seq.root_profile(BarRange::new(0, 2)), None);
        assert_eq!(seq.root_profile(BarRange::new(2, 3)), None);
    }

    #[test]
    fn test_sub_sequence_shift() {
        let seq = ChordSequence::parse("C | F | G | C", 4).unwrap();
        let kept = seq.sub_sequence(BarRange::new(1, 2), false);
        assert_eq!(kept.first_bar(), 1);
        assert!(kept.is_usable(2));
        assert!(!kept.is_usable(0));

        let shifted = seq.sub_sequence(BarRange::new(1, 2), true);
        assert_eq!(shifted.first_bar(), 0);
        assert_eq!(shifted.bars()[1].index, 1);
        assert_eq!(shifted.first_chord(0), seq.first_chord(1));
    }

    #[test]
    fn test_merge_reindexes() {
        let mut a = ChordSequence::parse("C | F", 4).unwrap();
        let b = ChordSequence::parse("G | ?", 4).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.len(), 4);
        assert_eq!(a.bars()[3].index, 3);
        assert!(!a.is_usable(3));

        let waltz = ChordSequence::parse("C", 3).unwrap();
        assert!(a.merge(&waltz).is_err());
    }

    #[test]
    fn test_bar_range_intersection() {
        let a = BarRange::new(0, 3);
        assert!(a.intersects(&BarRange::new(3, 5)));
        assert!(!a.intersects(&BarRange::new(4, 5)));
        assert_eq!(BarRange::sized(4, 2), BarRange::new(4, 5));
    }
}
