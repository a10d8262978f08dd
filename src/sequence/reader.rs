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
//! Resumable event-stream reader.
//!
//! Each call executes every event whose tick is at or before the cursor's
//! current tick, starting from the stored byte offset, and persists the offset
//! and next event tick back into the cursor. Nothing already consumed is parsed
//! again.

use midly::{
    num::{u14, u4, u7},
    MidiMessage, PitchBend,
};

use super::ByteReader;
use crate::cursor::SequenceCursor;

pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_TEMPO: u8 = 0x51;
pub const META_TIME_SIGNATURE: u8 = 0x58;

const STATUS_SYSTEM: u8 = 0xF0;
const STATUS_META: u8 = 0xFF;

/// Data bytes that follow each channel message type, indexed by bits 6-4 of the
/// status byte: note off, note on, key pressure, control change, program
/// change, channel pressure, pitch bend.
const PAYLOAD_SIZE: [usize; 7] = [2, 2, 2, 2, 1, 1, 2];

/// Whether the reader should keep going after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A problem in the byte stream. Fatal to the sequence being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("unknown status byte {status:#04x} at offset {offset}")]
    UnknownStatus { status: u8, offset: usize },
    #[error("data byte at offset {offset} with no running status")]
    MissingStatus { offset: usize },
    #[error("stream truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("variable-length value at offset {offset} is too long")]
    VlqOverflow { offset: usize },
}

/// Receives the events decoded by [`advance`].
///
/// The cursor is handed to every callback so that tempo or meter changes take
/// effect on the very next delta time.
pub trait EventSink {
    fn channel_message(
        &mut self,
        cursor: &mut SequenceCursor,
        channel: u4,
        message: MidiMessage,
    ) -> Flow;

    fn system(&mut self, _cursor: &mut SequenceCursor, _payload: &[u8]) -> Flow {
        Flow::Continue
    }

    fn meta(&mut self, cursor: &mut SequenceCursor, kind: u8, payload: &[u8]) -> Flow;
}

/// Decodes a channel message from its status byte and data bytes.
pub fn decode_channel_message(status: u8, data: &[u8]) -> MidiMessage {
    let first = u7::from(data.first().copied().unwrap_or(0));
    let second = u7::from(data.get(1).copied().unwrap_or(0));
    match (status >> 4) & 0x07 {
        0 => MidiMessage::NoteOff {
            key: first,
            vel: second,
        },
        1 => MidiMessage::NoteOn {
            key: first,
            vel: second,
        },
        2 => MidiMessage::Aftertouch {
            key: first,
            vel: second,
        },
        3 => MidiMessage::Controller {
            controller: first,
            value: second,
        },
        4 => MidiMessage::ProgramChange { program: first },
        5 => MidiMessage::ChannelAftertouch { vel: first },
        _ => MidiMessage::PitchBend {
            bend: PitchBend(u14::from(
                (u16::from(second.as_int()) << 7) | u16::from(first.as_int()),
            )),
        },
    }
}

/// Executes all due events for the cursor.
pub fn advance<S: EventSink>(
    data: &[u8],
    cursor: &mut SequenceCursor,
    sink: &mut S,
) -> Result<Flow, StreamError> {
    let chunk = cursor.chunk();
    let track = data
        .get(..chunk.end)
        .ok_or(StreamError::Truncated { offset: data.len() })?;
    let mut reader = ByteReader::new(track, chunk.start + cursor.chunk_ptr());

    while cursor.event_tick() <= cursor.tick() {
        let flow = dispatch(&mut reader, cursor, sink)?;
        cursor.set_chunk_ptr(reader.position() - chunk.start);
        if flow == Flow::Stop {
            return Ok(Flow::Stop);
        }

        let delta = reader.read_vlq()?;
        let next = cursor.event_tick().add_ticks(
            delta,
            cursor.ticks_per_beat(),
            cursor.beats_per_measure(),
        );
        cursor.set_event_tick(next);
        cursor.set_chunk_ptr(reader.position() - chunk.start);
    }
    Ok(Flow::Continue)
}

fn dispatch<S: EventSink>(
    reader: &mut ByteReader<'_>,
    cursor: &mut SequenceCursor,
    sink: &mut S,
) -> Result<Flow, StreamError> {
    let offset = reader.position();
    let byte = reader.peek()?;

    if byte < 0x80 {
        // Running status: the byte is data for the previous channel status.
        let status = cursor
            .running_status()
            .ok_or(StreamError::MissingStatus { offset })?;
        return channel_event(reader, cursor, sink, status);
    }

    reader.read_u8()?;
    match byte {
        0x80..=0xEF => {
            cursor.set_running_status(Some(byte));
            channel_event(reader, cursor, sink, byte)
        }
        STATUS_SYSTEM => {
            cursor.set_running_status(None);
            let len = reader.read_vlq()? as usize;
            let payload = reader.read_slice(len)?;
            Ok(sink.system(cursor, payload))
        }
        STATUS_META => {
            cursor.set_running_status(None);
            let kind = reader.read_u8()?;
            let len = reader.read_vlq()? as usize;
            let payload = reader.read_slice(len)?;
            Ok(sink.meta(cursor, kind, payload))
        }
        status => Err(StreamError::UnknownStatus { status, offset }),
    }
}

fn channel_event<S: EventSink>(
    reader: &mut ByteReader<'_>,
    cursor: &mut SequenceCursor,
    sink: &mut S,
    status: u8,
) -> Result<Flow, StreamError> {
    let size = PAYLOAD_SIZE[usize::from((status >> 4) & 0x07)];
    let data = reader.read_slice(size)?;
    let message = decode_channel_message(status, data);
    Ok(sink.channel_message(cursor, u4::from(status & 0x0F), message))
}
