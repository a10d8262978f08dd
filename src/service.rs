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
//! Drives an engine from a dedicated real-time thread.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, MutexGuard};
use tracing::{error, info, span, warn, Level};

use crate::{
    engine::{Engine, EngineEvent},
    playsync::CancelHandle,
};

mod thread_priority;

pub use thread_priority::PRIORITY_ENV;

/// How far the service thread may fall behind before it drops the missed
/// quanta and resynchronizes with the wall clock.
const MAX_LAG_QUANTA: u32 = 8;

/// Owns an engine and the thread that services it.
///
/// Every control operation goes through [`Sequencer::lock`], which takes the
/// same lock the service thread takes once per quantum.
pub struct Sequencer {
    engine: Arc<Mutex<Engine>>,
    cancel_handle: CancelHandle,
    join_handle: Option<JoinHandle<()>>,
}

impl Sequencer {
    /// Wraps an engine. Nothing is serviced until [`Sequencer::start`].
    pub fn new(engine: Engine) -> Sequencer {
        Sequencer {
            engine: Arc::new(Mutex::new(engine)),
            cancel_handle: CancelHandle::new(),
            join_handle: None,
        }
    }

    /// Locks the engine for a control operation.
    pub fn lock(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock()
    }

    /// Subscribes to engine notifications.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.engine.lock().subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.join_handle.is_some()
    }

    /// Spawns the service thread. Does nothing if it's already running.
    pub fn start(&mut self) -> Result<(), std::io::Error> {
        if self.join_handle.is_some() {
            return Ok(());
        }

        self.cancel_handle = CancelHandle::new();
        let engine = self.engine.clone();
        let cancel_handle = self.cancel_handle.clone();
        let quantum = engine.lock().settings().quantum;
        let priority = thread_priority::service_thread_priority();

        let join_handle = thread::Builder::new()
            .name("midimux-service".to_string())
            .spawn(move || {
                let span = span!(Level::INFO, "service thread");
                let _enter = span.enter();

                thread_priority::configure_service_thread_priority(priority);
                service_loop(&engine, &cancel_handle, quantum);
            })?;
        info!(quantum = ?quantum, "Started service thread.");
        self.join_handle = Some(join_handle);
        Ok(())
    }

    /// Stops the service thread and waits for it to exit. Playing sequences
    /// stay where they are.
    pub fn stop(&mut self) {
        let Some(join_handle) = self.join_handle.take() else {
            return;
        };
        self.cancel_handle.cancel();
        if join_handle.join().is_err() {
            error!("Service thread panicked.");
        } else {
            info!("Stopped service thread.");
        }
    }

    /// The handle the running service thread watches.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Services the engine on an absolute schedule until cancelled.
fn service_loop(engine: &Mutex<Engine>, cancel_handle: &CancelHandle, quantum: Duration) {
    let mut next = Instant::now();
    loop {
        if cancel_handle.is_cancelled() {
            return;
        }

        engine.lock().service();

        next += quantum;
        let now = Instant::now();
        if next > now {
            spin_sleep::sleep(next - now);
        } else if now - next > quantum * MAX_LAG_QUANTA {
            warn!(behind = ?(now - next), "Service thread fell behind, skipping quanta.");
            next = now;
        }
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, sync::Arc};

    use crate::{
        engine::{Engine, EngineEvent, Settings},
        midi::MockDevice,
        sequence::{MemoryStore, SoundId},
        testutil::{eventually, Event, SequenceBuilder},
    };

    use super::Sequencer;

    fn sequencer(store: MemoryStore) -> (Sequencer, MockDevice) {
        let device = MockDevice::get("mock-service");
        let engine = Engine::new(
            Settings::default(),
            Arc::new(store),
            Arc::new(device.clone()),
        )
        .expect("engine");
        (Sequencer::new(engine), device)
    }

    #[test]
    fn plays_sequence_to_the_end() -> Result<(), Box<dyn Error>> {
        let store = MemoryStore::new();
        store.insert(
            SoundId(1),
            SequenceBuilder::new()
                .track(vec![
                    Event::part_setup(0, 0, true, 0, 127, 0),
                    Event::note_on(0, 0, 60, 100),
                    Event::note_off(120, 0, 60),
                    Event::end_of_track(0),
                ])
                .build(),
        );
        let (mut sequencer, device) = sequencer(store);
        let events = sequencer.subscribe();

        sequencer.start()?;
        assert!(sequencer.is_running());
        sequencer.lock().start_sequence(SoundId(1), 50)?;

        eventually(
            || !sequencer.lock().is_playing(SoundId(1)),
            "Sequence never finished",
        );
        assert_eq!(events.try_recv()?, EngineEvent::Finished(SoundId(1)));
        assert!(!device.emitted().is_empty());

        sequencer.stop();
        assert!(!sequencer.is_running());
        Ok(())
    }

    #[test]
    fn stop_leaves_sequences_in_place() -> Result<(), Box<dyn Error>> {
        let store = MemoryStore::new();
        store.insert(
            SoundId(2),
            SequenceBuilder::new()
                .track(vec![
                    Event::note_on(0, 0, 60, 100),
                    Event::end_of_track(480 * 400),
                ])
                .build(),
        );
        let (mut sequencer, _device) = sequencer(store);
        sequencer.start()?;
        sequencer.lock().start_sequence(SoundId(2), 10)?;
        sequencer.stop();

        let tick = sequencer.lock().player(SoundId(2)).map(|p| p.cursor().tick());
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(
            sequencer.lock().player(SoundId(2)).map(|p| p.cursor().tick()),
            tick
        );

        // Restarting picks up where it left off.
        sequencer.start()?;
        eventually(
            || sequencer.lock().player(SoundId(2)).map(|p| p.cursor().tick()) != tick,
            "Sequence never resumed",
        );
        Ok(())
    }
}
