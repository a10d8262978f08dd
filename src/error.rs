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
use crate::sequence::{SoundId, StreamError};

/// Errors returned by the control surface of the engine.
///
/// The periodic service routine never returns these; failures there are
/// logged and handled in place.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A priority, volume, tick field, group id or similar was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No free player slot was available.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The sequence data was missing, not playing, or the chunk lookup failed.
    #[error("invalid sequence {id}: {reason}")]
    InvalidSequence { id: SoundId, reason: String },

    /// An unrecognized status byte or truncated data was found while playing.
    #[error("stream corruption in sequence {id}")]
    StreamCorruption {
        id: SoundId,
        #[source]
        source: StreamError,
    },

    /// A sustained relocation could not account for every sounding note.
    #[error("sequence {id} had {missing} sounding notes with no place at the destination")]
    ReconciliationFailure { id: SoundId, missing: u32 },
}

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Error {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_sequence(id: SoundId, reason: impl Into<String>) -> Error {
        Error::InvalidSequence {
            id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages_name_the_sequence() {
        let err = Error::invalid_sequence(SoundId(7), "no track chunk 3");
        assert_eq!(err.to_string(), "invalid sequence 7: no track chunk 3");

        let err = Error::StreamCorruption {
            id: SoundId(2),
            source: StreamError::UnknownStatus {
                status: 0xF4,
                offset: 19,
            },
        };
        assert_eq!(err.to_string(), "stream corruption in sequence 2");
        assert_eq!(
            std::error::Error::source(&err).map(|e| e.to_string()),
            Some("unknown status byte 0xf4 at offset 19".to_string())
        );
    }
}
