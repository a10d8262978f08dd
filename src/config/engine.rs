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
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::{
    clock::{DEFAULT_TEMPO, UNITY_SPEED},
    cursor::{DEFAULT_BEATS_PER_MEASURE, DEFAULT_TICKS_PER_BEAT},
    engine::{self, Settings, DEFAULT_PHYSICAL_CHANNELS, DEFAULT_PLAYER_SLOTS, DEFAULT_QUANTUM},
    error::Error,
    sequence::SoundId,
};

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Engine {
    /// How often the engine is serviced, e.g. "6944us".
    quantum: Option<String>,

    /// Number of physical output channels.
    physical_channels: Option<usize>,

    /// Number of sequences that may play at once.
    player_slots: Option<usize>,

    /// Meter new sequences start with.
    ticks_per_beat: Option<u32>,
    beats_per_measure: Option<u32>,

    /// Initial tempo in microseconds per beat.
    tempo: Option<u32>,

    /// Initial speed, 128 is unity.
    speed: Option<u32>,

    relocation_limits: Option<RelocationLimits>,

    /// The MIDI output device. Names starting with "mock" never touch hardware.
    midi_device: Option<String>,

    /// Sequences to load at startup.
    #[serde(default)]
    sequences: Vec<Sequence>,
}

/// Upper bounds of relocation targets.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct RelocationLimits {
    measures: Option<u32>,
    beats: Option<u32>,
    ticks: Option<u32>,
}

/// A sequence file and the id it's started by.
#[derive(Deserialize, Clone, Debug)]
pub struct Sequence {
    id: u32,
    path: PathBuf,
}

impl Sequence {
    pub fn new(id: u32, path: &Path) -> Sequence {
        Sequence {
            id,
            path: path.to_path_buf(),
        }
    }

    pub fn id(&self) -> SoundId {
        SoundId(self.id)
    }

    /// The sequence path. Relative paths are relative to `base`.
    pub fn path(&self, base: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            base.join(&self.path)
        }
    }
}

impl Engine {
    /// Parse an engine configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Engine, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Engine>()?)
    }

    /// Returns the configured MIDI device, if any.
    pub fn midi_device(&self) -> Option<&str> {
        self.midi_device.as_deref()
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    /// Returns the service quantum.
    pub fn quantum(&self) -> Result<Duration, Error> {
        match &self.quantum {
            Some(quantum) => Ok(DurationString::from_string(quantum.clone())
                .map_err(|e| Error::invalid_argument(format!("quantum {}: {}", quantum, e)))?
                .into()),
            None => Ok(DEFAULT_QUANTUM),
        }
    }

    /// Builds validated engine settings, filling in defaults.
    pub fn to_settings(&self) -> Result<Settings, Error> {
        let limits = self.relocation_limits.clone().unwrap_or_default();
        let defaults = engine::RelocationLimits::default();
        let settings = Settings {
            quantum: self.quantum()?,
            physical_channels: self.physical_channels.unwrap_or(DEFAULT_PHYSICAL_CHANNELS),
            player_slots: self.player_slots.unwrap_or(DEFAULT_PLAYER_SLOTS),
            ticks_per_beat: self.ticks_per_beat.unwrap_or(DEFAULT_TICKS_PER_BEAT),
            beats_per_measure: self.beats_per_measure.unwrap_or(DEFAULT_BEATS_PER_MEASURE),
            tempo: self.tempo.unwrap_or(DEFAULT_TEMPO),
            speed: self.speed.unwrap_or(UNITY_SPEED),
            relocation_limits: engine::RelocationLimits {
                measures: limits.measures.unwrap_or(defaults.measures),
                beats: limits.beats.unwrap_or(defaults.beats),
                ticks: limits.ticks.unwrap_or(defaults.ticks),
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> Engine {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("midi_device: mock-out");
        assert_eq!(config.midi_device(), Some("mock-out"));
        assert!(config.sequences().is_empty());
        assert_eq!(config.to_settings().unwrap(), Settings::default());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
            quantum: 10ms
            physical_channels: 8
            player_slots: 4
            ticks_per_beat: 96
            beats_per_measure: 3
            tempo: 400000
            speed: 64
            relocation_limits:
              measures: 200
              beats: 4
            sequences:
              - id: 1
                path: intro.mid
              - id: 7
                path: /music/boss.mid
            "#,
        );

        let settings = config.to_settings().unwrap();
        assert_eq!(settings.quantum, Duration::from_millis(10));
        assert_eq!(settings.physical_channels, 8);
        assert_eq!(settings.player_slots, 4);
        assert_eq!(settings.ticks_per_beat, 96);
        assert_eq!(settings.beats_per_measure, 3);
        assert_eq!(settings.tempo, 400000);
        assert_eq!(settings.speed, 64);
        assert_eq!(settings.relocation_limits.measures, 200);
        assert_eq!(settings.relocation_limits.beats, 4);
        assert_eq!(
            settings.relocation_limits.ticks,
            engine::RelocationLimits::default().ticks
        );

        let base = Path::new("/games/one");
        let sequences = config.sequences();
        assert_eq!(sequences[0].id(), SoundId(1));
        assert_eq!(sequences[0].path(base), PathBuf::from("/games/one/intro.mid"));
        assert_eq!(sequences[1].id(), SoundId(7));
        assert_eq!(sequences[1].path(base), PathBuf::from("/music/boss.mid"));
    }

    #[test]
    fn test_invalid_settings() {
        let config = parse("physical_channels: 17");
        assert!(matches!(
            config.to_settings(),
            Err(Error::InvalidArgument(_))
        ));

        let config = parse("quantum: soon");
        assert!(matches!(config.quantum(), Err(Error::InvalidArgument(_))));

        let config = parse("relocation_limits:\n  beats: 40");
        assert!(config.to_settings().is_err());
    }

    #[test]
    fn test_deserialize_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "player_slots: 3\nsequences:\n  - id: 2\n    path: a.mid").unwrap();

        let config = Engine::deserialize(file.path()).unwrap();
        assert_eq!(config.to_settings().unwrap().player_slots, 3);
        assert_eq!(config.sequences()[0].id(), SoundId(2));

        let missing = Engine::deserialize(Path::new("/nonexistent/midimux.yaml"));
        assert!(matches!(missing, Err(ConfigError::Load(_))));
    }
}
