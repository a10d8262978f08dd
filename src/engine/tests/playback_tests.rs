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
use midly::{
    num::{u14, u7},
    MidiMessage, PitchBend,
};

use crate::channel::{CC_ALL_NOTES_OFF, CC_MODULATION, CC_RESET_CONTROLLERS, CC_SUSTAIN};
use crate::engine::tests::common::{
    binding, controllers, held_note, note_offs, note_ons, service, test_engine, test_settings,
    TestEngine, TICKS_PER_SERVICE,
};
use crate::engine::{EngineEvent, Param};
use crate::sequence::SoundId;
use crate::testutil::Event;
use crate::tick::Tick;

fn all_messages(device: &crate::midi::MockDevice) -> Vec<MidiMessage> {
    device.emitted().into_iter().map(|(_, m)| m).collect()
}

#[test]
fn test_end_of_track_finishes_and_releases() {
    let TestEngine {
        mut engine,
        device,
        events,
    } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![Event::note_on(0, 0, 60, 100), Event::end_of_track(25)],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();

    service(&mut engine, 2);
    assert!(engine.is_playing(SoundId(1)));
    assert!(events.try_recv().is_err());

    service(&mut engine, 1);
    assert!(!engine.is_playing(SoundId(1)));
    assert_eq!(events.try_recv().unwrap(), EngineEvent::Finished(SoundId(1)));
    assert_eq!(note_offs(&device.emitted_on(0)), vec![60]);
    assert!(engine.physical_channels().iter().all(|p| p.is_free()));
}

#[test]
fn test_unknown_status_aborts_only_that_sequence() {
    let TestEngine {
        mut engine,
        device,
        events,
    } = test_engine(
        test_settings(4),
        vec![
            (
                1,
                vec![
                    Event::note_on(0, 0, 60, 100),
                    Event::raw(20, vec![0xF4, 0x00]),
                ],
            ),
            (
                2,
                vec![
                    Event::note_on(0, 1, 62, 100),
                    Event::note_on(30, 1, 64, 100),
                    Event::end_of_track(1000),
                ],
            ),
        ],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();
    engine.start_sequence(SoundId(2), 10).unwrap();

    service(&mut engine, 2);
    assert_eq!(events.try_recv().unwrap(), EngineEvent::Aborted(SoundId(1)));
    assert!(!engine.is_playing(SoundId(1)));
    assert!(engine.is_playing(SoundId(2)));
    assert!(note_offs(&all_messages(&device)).contains(&60));

    service(&mut engine, 2);
    assert_eq!(note_ons(&all_messages(&device)), vec![62, 60, 64]);
}

#[test]
fn test_data_byte_without_status_aborts() {
    let TestEngine {
        mut engine, events, ..
    } = test_engine(
        test_settings(4),
        vec![(1, vec![Event::raw(0, vec![0x3C, 0x40])])],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();
    service(&mut engine, 1);
    assert_eq!(events.try_recv().unwrap(), EngineEvent::Aborted(SoundId(1)));
}

#[test]
fn test_running_status() {
    let TestEngine {
        mut engine, device, ..
    } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![
                Event::raw(0, vec![0x90, 60, 100]),
                Event::raw(10, vec![62, 100]),
                Event::raw(10, vec![60, 0]),
                Event::end_of_track(1000),
            ],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();
    service(&mut engine, 2);

    let emitted = device.emitted_on(0);
    assert_eq!(note_ons(&emitted), vec![60, 62]);
    assert_eq!(note_offs(&emitted), vec![60]);
}

#[test]
fn test_marker_is_published() {
    let TestEngine {
        mut engine, events, ..
    } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![Event::marker(10, 7), Event::end_of_track(100_000)],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();
    assert_eq!(engine.get_param(SoundId(1), Param::Marker).unwrap(), -1);

    service(&mut engine, 1);
    assert_eq!(events.try_recv().unwrap(), EngineEvent::Marker(SoundId(1), 7));
    assert_eq!(engine.get_param(SoundId(1), Param::Marker).unwrap(), 7);
}

#[test]
fn test_tempo_change_rescales_clock() {
    let TestEngine { mut engine, .. } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![Event::tempo(0, 240_000), Event::end_of_track(100_000)],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();
    service(&mut engine, 2);

    // The first quantum still runs at the old tempo.
    assert_eq!(
        engine.player(SoundId(1)).unwrap().cursor().tick(),
        Tick::from_parts(0, 0, TICKS_PER_SERVICE + 2 * TICKS_PER_SERVICE)
    );
}

#[test]
fn test_speed_param_scales_clock() {
    let TestEngine { mut engine, .. } =
        test_engine(test_settings(4), vec![(1, held_note(0, 60))]);
    engine.start_sequence(SoundId(1), 10).unwrap();

    assert_eq!(engine.set_param(SoundId(1), Param::Speed, 64).unwrap(), 128);
    service(&mut engine, 2);
    assert_eq!(
        engine.player(SoundId(1)).unwrap().cursor().tick(),
        Tick::from_parts(0, 0, TICKS_PER_SERVICE)
    );
}

#[test]
fn test_pause_is_counted() {
    let TestEngine { mut engine, .. } =
        test_engine(test_settings(4), vec![(1, held_note(0, 60))]);
    engine.start_sequence(SoundId(1), 10).unwrap();
    let tick = |engine: &crate::engine::Engine| engine.player(SoundId(1)).unwrap().cursor().tick();

    assert_eq!(engine.pause(), 1);
    assert_eq!(engine.pause(), 2);
    service(&mut engine, 5);
    assert_eq!(tick(&engine), Tick::ZERO);

    assert_eq!(engine.resume(), 1);
    service(&mut engine, 5);
    assert_eq!(tick(&engine), Tick::ZERO);

    assert_eq!(engine.resume(), 0);
    service(&mut engine, 1);
    assert_eq!(tick(&engine), Tick::from_parts(0, 0, TICKS_PER_SERVICE));

    assert_eq!(engine.resume(), 0);
    assert_eq!(engine.pause_depth(), 0);
}

#[test]
fn test_transpose_applies_to_new_notes() {
    let TestEngine {
        mut engine, device, ..
    } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![
                Event::note_on(0, 0, 60, 100),
                Event::note_on(0, 0, 127, 100),
                Event::note_off(10, 0, 60),
                Event::end_of_track(1000),
            ],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();
    engine.set_param(SoundId(1), Param::Transpose, 2).unwrap();
    service(&mut engine, 1);

    // 127 + 2 is out of range and dropped.
    let emitted = device.emitted_on(0);
    assert_eq!(note_ons(&emitted), vec![62]);
    assert_eq!(note_offs(&emitted), vec![62]);
}

#[test]
fn test_pitch_bend_and_detune() {
    let TestEngine {
        mut engine, device, ..
    } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![
                Event::pitch_bend(0, 0, 0x3FFF),
                Event::end_of_track(100_000),
            ],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();
    service(&mut engine, 1);

    // (2 * (0x3FFF - 0x2000)) >> 5
    assert_eq!(engine.physical_channels()[0].pitch(), 511);
    let bend = |value: u16| MidiMessage::PitchBend {
        bend: PitchBend(u14::from(value)),
    };
    assert!(device.emitted_on(0).contains(&bend(2 * 511 + 0x2000)));

    engine.set_param(SoundId(1), Param::Detune, 100).unwrap();
    assert_eq!(engine.physical_channels()[0].pitch(), 611);
    assert!(device.emitted_on(0).contains(&bend(2 * 611 + 0x2000)));
}

#[test]
fn test_sustain_pedal_holds_note_offs() {
    let TestEngine {
        mut engine, device, ..
    } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![
                Event::controller(0, 0, CC_SUSTAIN, 127),
                Event::note_on(0, 0, 60, 100),
                Event::note_off(10, 0, 60),
                Event::controller(10, 0, CC_SUSTAIN, 0),
                Event::end_of_track(1000),
            ],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();

    service(&mut engine, 1);
    assert!(note_offs(&device.emitted_on(0)).is_empty());
    assert_eq!(engine.physical_channels()[0].sustained(), 1u128 << 60);

    service(&mut engine, 1);
    let emitted = device.emitted_on(0);
    assert_eq!(note_offs(&emitted), vec![60]);
    assert_eq!(controllers(&emitted, CC_SUSTAIN).last(), Some(&0));
    assert_eq!(engine.physical_channels()[0].sustained(), 0);
}

#[test]
fn test_part_setup() {
    let TestEngine {
        mut engine, device, ..
    } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![
                // Part 0 is muted by its trim, part 1 gets a program.
                Event::part_setup(0, 0, true, 0, 0, 5),
                Event::part_setup(0, 1, true, 0, 100, 12),
                Event::note_on(0, 0, 60, 100),
                Event::note_on(0, 1, 62, 100),
                Event::end_of_track(1000),
            ],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();
    service(&mut engine, 1);

    let player = engine.player(SoundId(1)).unwrap();
    assert_eq!(player.channels[0].trim(), 0);
    assert_eq!(player.channels[0].program(), Some(5));
    assert_eq!(binding(&engine, 1, 0), None);

    let physical = binding(&engine, 1, 1).unwrap().physical;
    assert_eq!(physical, 0);
    assert_eq!(engine.physical_channels()[0].program(), Some(12));
    assert_eq!(note_ons(&all_messages(&device)), vec![62]);
    assert!(device
        .emitted_on(0)
        .contains(&MidiMessage::ProgramChange {
            program: u7::from(12)
        }));
}

#[test]
fn test_controllers() {
    let TestEngine {
        mut engine, device, ..
    } = test_engine(
        test_settings(4),
        vec![(
            1,
            vec![
                Event::note_on(0, 0, 60, 100),
                Event::controller(0, 0, CC_MODULATION, 64),
                Event::controller(0, 0, 91, 40),
                // Ticks 15 and 25, one per later service call.
                Event::controller(15, 0, CC_RESET_CONTROLLERS, 0),
                Event::controller(10, 0, CC_ALL_NOTES_OFF, 0),
                Event::end_of_track(1000),
            ],
        )],
    );
    engine.start_sequence(SoundId(1), 10).unwrap();

    service(&mut engine, 1);
    let emitted = device.emitted_on(0);
    assert_eq!(controllers(&emitted, CC_MODULATION).last(), Some(&64));
    assert_eq!(controllers(&emitted, 91), vec![40]);

    device.take();
    service(&mut engine, 1);
    assert_eq!(controllers(&device.emitted_on(0), CC_MODULATION), vec![0]);

    device.take();
    service(&mut engine, 1);
    assert_eq!(
        controllers(&device.emitted_on(0), CC_ALL_NOTES_OFF),
        vec![0]
    );
    assert_eq!(engine.physical_channels()[0].notes(), 0);
}
