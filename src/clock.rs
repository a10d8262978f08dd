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
//! Converts tempo and speed into a fixed-point tick step per service quantum.

/// Ticks per quarter note that the step is computed against.
pub const TICKS_PER_QUARTER: u32 = 480;

/// Speed value that plays at the written tempo.
pub const UNITY_SPEED: u32 = 128;

/// Largest accepted speed value.
pub const MAX_SPEED: u32 = 255;

/// Default tempo in microseconds per beat (120 bpm).
pub const DEFAULT_TEMPO: u32 = 500_000;

const HIGH_WORD: u32 = 0xFFFF_0000;

/// Computes the 16.16 fixed-point number of ticks that elapse in one quantum of
/// `quantum_us` microseconds at `tempo` microseconds per beat.
///
/// Both operands are shifted down together until they fit in 16 bits so that
/// `ticks << 16` cannot overflow.
pub fn step_for_tempo(quantum_us: u32, tempo: u32) -> u32 {
    let mut ticks = quantum_us.saturating_mul(TICKS_PER_QUARTER);
    let mut tempo = tempo;
    while ticks & HIGH_WORD != 0 || tempo & HIGH_WORD != 0 {
        ticks >>= 1;
        tempo >>= 1;
    }
    (ticks << 16) / tempo.max(1)
}

/// Scales a step by an 8-bit speed where `UNITY_SPEED` is 1.0.
pub fn apply_speed(step: u32, speed: u32) -> u32 {
    let scaled = (u64::from(speed) * u64::from(step)) >> 7;
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// The clock state of a single sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clock {
    quantum_us: u32,
    tempo: u32,
    speed: u32,
    step: u32,
    step_fixed: u32,
    fraction: u32,
}

impl Clock {
    /// Creates a clock at the given tempo and unity speed.
    pub fn new(quantum_us: u32, tempo: u32) -> Clock {
        let mut clock = Clock {
            quantum_us,
            tempo: DEFAULT_TEMPO,
            speed: UNITY_SPEED,
            step: 0,
            step_fixed: 0,
            fraction: 0,
        };
        clock.set_tempo(tempo);
        clock
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// The step before speed is applied.
    pub fn step(&self) -> u32 {
        self.step
    }

    /// The step actually added every quantum.
    pub fn step_fixed(&self) -> u32 {
        self.step_fixed
    }

    /// Sets the tempo in microseconds per beat and recomputes the step. A zero
    /// tempo is treated as one microsecond.
    pub fn set_tempo(&mut self, tempo: u32) {
        self.tempo = tempo.max(1);
        self.step = step_for_tempo(self.quantum_us, self.tempo);
        self.step_fixed = apply_speed(self.step, self.speed);
    }

    /// Sets the speed. Values above `MAX_SPEED` are rejected and leave the
    /// clock untouched.
    pub fn set_speed(&mut self, speed: u32) -> bool {
        if speed > MAX_SPEED {
            return false;
        }
        self.speed = speed;
        self.step_fixed = apply_speed(self.step, speed);
        true
    }

    /// Advances by one quantum and returns the whole ticks that elapsed. The
    /// fractional remainder carries into the next call.
    pub fn advance(&mut self) -> u32 {
        let total = u64::from(self.fraction) + u64::from(self.step_fixed);
        self.fraction = (total & 0xFFFF) as u32;
        (total >> 16) as u32
    }
}
