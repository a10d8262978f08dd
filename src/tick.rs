// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Packed musical positions.
//!
//! A position is a single `u32` holding three fields:
//! - bits 0-15: sub-beat ticks
//! - bits 16-19: beat within the measure
//! - bits 20-31: measure
//!
//! The tick and beat thresholds are configured per sequence and are not powers
//! of two, so normalizing a position is a carry through two runtime radices
//! rather than a mask.

use std::fmt;

/// One beat in the packed representation.
pub const BEAT_UNIT: u32 = 1 << 16;

/// One measure in the packed representation.
pub const MEASURE_UNIT: u32 = 1 << 20;

const SUB_BEAT_MASK: u32 = 0xFFFF;
const BEAT_MASK: u32 = 0xF;

/// Largest ticks-per-beat that keeps a carry inside the sub-beat field.
pub const MAX_TICKS_PER_BEAT: u32 = 0x7FFF;

/// Largest beats-per-measure that fits the beat field.
pub const MAX_BEATS_PER_MEASURE: u32 = 15;

/// Delta ticks are folded in pieces no larger than this so the sub-beat field
/// never overflows into the beat field before normalization.
const MAX_FOLD_STEP: u32 = 0x8000;

/// A packed (measure, beat, sub-beat) position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(u32);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// Packs the given fields without normalizing them.
    pub fn from_parts(measure: u32, beat: u32, sub_beat: u32) -> Tick {
        Tick(
            measure.wrapping_mul(MEASURE_UNIT)
                | ((beat & BEAT_MASK) << 16)
                | (sub_beat & SUB_BEAT_MASK),
        )
    }

    /// Wraps an already packed value.
    pub fn from_raw(raw: u32) -> Tick {
        Tick(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn measure(self) -> u32 {
        self.0 >> 20
    }

    pub fn beat(self) -> u32 {
        (self.0 >> 16) & BEAT_MASK
    }

    pub fn sub_beat(self) -> u32 {
        self.0 & SUB_BEAT_MASK
    }

    /// Carries excess sub-beats into beats and excess beats into measures.
    ///
    /// The thresholds must already have been validated: `ticks_per_beat` in
    /// `1..=MAX_TICKS_PER_BEAT` and `beats_per_measure` in
    /// `1..=MAX_BEATS_PER_MEASURE`.
    pub fn normalize(self, ticks_per_beat: u32, beats_per_measure: u32) -> Tick {
        let mut value = self.0;
        let beats_fixed = beats_per_measure << 16;
        loop {
            while (value >> 16) & BEAT_MASK >= beats_per_measure {
                value = value.wrapping_sub(beats_fixed).wrapping_add(MEASURE_UNIT);
            }
            if value & SUB_BEAT_MASK < ticks_per_beat {
                return Tick(value);
            }
            value = value.wrapping_sub(ticks_per_beat).wrapping_add(BEAT_UNIT);
        }
    }

    /// Adds a delta of plain ticks and normalizes the result.
    pub fn add_ticks(self, delta: u32, ticks_per_beat: u32, beats_per_measure: u32) -> Tick {
        let mut tick = self.normalize(ticks_per_beat, beats_per_measure);
        let mut remaining = delta;
        while remaining > 0 {
            let step = remaining.min(MAX_FOLD_STEP);
            tick = Tick(tick.0.wrapping_add(step)).normalize(ticks_per_beat, beats_per_measure);
            remaining -= step;
        }
        tick
    }

    /// Folds an unbounded count of ticks into a normalized position.
    pub fn from_ticks(count: u32, ticks_per_beat: u32, beats_per_measure: u32) -> Tick {
        Tick::ZERO.add_ticks(count, ticks_per_beat, beats_per_measure)
    }

    /// Converts a normalized position back into a linear tick count.
    pub fn to_linear(self, ticks_per_beat: u32, beats_per_measure: u32) -> u64 {
        let per_measure = u64::from(ticks_per_beat) * u64::from(beats_per_measure);
        u64::from(self.measure()) * per_measure
            + u64::from(self.beat()) * u64::from(ticks_per_beat)
            + u64::from(self.sub_beat())
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.measure(), self.beat(), self.sub_beat())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packs_fields() {
        let tick = Tick::from_parts(3, 2, 100);
        assert_eq!(tick.measure(), 3);
        assert_eq!(tick.beat(), 2);
        assert_eq!(tick.sub_beat(), 100);
        assert_eq!(tick.to_string(), "3:2:100");
    }

    #[test]
    fn carries_sub_beats_into_beats_and_measures() {
        // 480 ticks per beat, 4 beats per measure.
        let tick = Tick::from_parts(0, 3, 500).normalize(480, 4);
        assert_eq!((tick.measure(), tick.beat(), tick.sub_beat()), (1, 0, 20));

        let tick = Tick::from_ticks(480 * 4 * 2 + 480 + 7, 480, 4);
        assert_eq!((tick.measure(), tick.beat(), tick.sub_beat()), (2, 1, 7));
    }

    #[test]
    fn carries_excess_beats_even_without_sub_beat_overflow() {
        let tick = Tick::from_parts(0, 11, 0).normalize(480, 4);
        assert_eq!((tick.measure(), tick.beat(), tick.sub_beat()), (2, 3, 0));
    }

    #[test]
    fn normalized_fields_stay_below_thresholds() {
        let thresholds = [(1, 1), (3, 2), (96, 3), (120, 5), (480, 4), (479, 7), (0x7FFF, 15)];
        for (ticks_per_beat, beats_per_measure) in thresholds {
            // Stay inside the 12-bit measure field.
            let limit = (ticks_per_beat * beats_per_measure * 4000).min(50_000);
            let mut count = 0u32;
            while count < limit {
                let tick = Tick::from_ticks(count, ticks_per_beat, beats_per_measure);
                assert!(
                    tick.sub_beat() < ticks_per_beat,
                    "sub-beat {} for count {} at {}/{}",
                    tick.sub_beat(),
                    count,
                    ticks_per_beat,
                    beats_per_measure
                );
                assert!(tick.beat() < beats_per_measure);
                assert_eq!(
                    tick.to_linear(ticks_per_beat, beats_per_measure),
                    u64::from(count)
                );
                count += 97;
            }
        }
    }

    #[test]
    fn large_deltas_do_not_corrupt_the_beat_field() {
        let tick = Tick::ZERO.add_ticks(200_000, 96, 3);
        assert_eq!(tick.to_linear(96, 3), 200_000);
        assert!(tick.beat() < 3);
    }

    #[test]
    fn ordering_follows_musical_time_once_normalized() {
        let a = Tick::from_ticks(1919, 480, 4);
        let b = Tick::from_ticks(1920, 480, 4);
        let c = Tick::from_ticks(2400, 480, 4);
        assert!(a < b);
        assert!(b < c);
    }
}
