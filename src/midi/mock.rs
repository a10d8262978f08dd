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
use std::{error::Error, fmt, sync::Arc};

use midly::{live::LiveEvent, num::u4, MidiMessage};
use parking_lot::Mutex;
use tracing::debug;

/// A mock device. Doesn't actually play anything, but remembers every channel
/// message it was asked to emit.
#[derive(Clone)]
pub struct Device {
    name: String,
    emitted: Arc<Mutex<Vec<(u4, MidiMessage)>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            emitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Everything emitted so far, in order.
    pub fn emitted(&self) -> Vec<(u4, MidiMessage)> {
        self.emitted.lock().clone()
    }

    /// Returns and forgets everything emitted so far.
    pub fn take(&self) -> Vec<(u4, MidiMessage)> {
        std::mem::take(&mut *self.emitted.lock())
    }

    /// Messages emitted on one output channel.
    pub fn emitted_on(&self, channel: u8) -> Vec<MidiMessage> {
        self.emitted
            .lock()
            .iter()
            .filter(|(c, _)| c.as_int() == channel)
            .map(|(_, message)| *message)
            .collect()
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    /// Emits an event.
    fn emit(&self, event: LiveEvent<'static>) -> Result<(), Box<dyn Error>> {
        if let LiveEvent::Midi { channel, message } = event {
            debug!(device = self.name, channel = channel.as_int(), message = ?message, "Emitting event.");
            self.emitted.lock().push((channel, message));
        }
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}
