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
//! A real-time MIDI sequencing engine that arbitrates a small pool of output
//! channels between concurrently playing sequences.

pub mod channel;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod midi;
pub mod player;
pub mod playsync;
pub mod sequence;
pub mod service;
pub mod tick;

#[cfg(test)]
mod testutil;

pub use error::Error;
