use std::fmt;

use anyhow::Result;
use serde::Deserialize;
use thiserror::Error;

use crate::config::MixerSettings;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("mixer unavailable: {0}")]
    Unavailable(String),
    #[error("volume {value} outside mixer range {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
}

impl SinkError {
    pub fn unavailable(reason: impl fmt::Display) -> Self {
        Self::Unavailable(reason.to_string())
    }
}

/// Unit space a sink is addressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixerUnits {
    #[default]
    Raw,
    /// Hundredths of a decibel, as reported by the ALSA dB API.
    #[serde(alias = "decibel")]
    Db,
}

impl MixerUnits {
    pub fn default_step(self) -> i64 {
        match self {
            Self::Raw => 10,
            Self::Db => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixerBackend {
    Alsa,
    Amixer,
}

impl Default for MixerBackend {
    fn default() -> Self {
        if cfg!(feature = "hardware") {
            Self::Alsa
        } else {
            Self::Amixer
        }
    }
}

/// Bounds of a volume control. `min` is the floor the control reports, which
/// on these DACs is the mute position; `usable_min` is the first audible step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeRange {
    pub min: i64,
    pub max: i64,
    pub usable_min: i64,
}

impl VolumeRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            usable_min: (min + 1).min(max),
        }
    }

    pub fn with_usable_min(min: i64, max: i64, usable_min: i64) -> Self {
        Self {
            min,
            max,
            usable_min: usable_min.clamp(min, max),
        }
    }

    pub fn is_muted(&self, value: i64) -> bool {
        value < self.usable_min
    }

    pub fn check(&self, value: i64) -> Result<(), SinkError> {
        if value > self.max {
            return Err(SinkError::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

pub trait VolumeSink {
    fn range(&self) -> Result<VolumeRange, SinkError>;
    fn get(&self) -> Result<i64, SinkError>;
    /// Values at or below `range().min` select the mute position.
    fn set(&self, value: i64) -> Result<(), SinkError>;
    /// Flips the playback switch and returns `true` when now muted.
    fn toggle_mute(&self) -> Result<bool, SinkError>;
    fn describe(&self) -> String {
        String::from("mixer")
    }
}

impl<S: VolumeSink + ?Sized> VolumeSink for Box<S> {
    fn range(&self) -> Result<VolumeRange, SinkError> {
        (**self).range()
    }

    fn get(&self) -> Result<i64, SinkError> {
        (**self).get()
    }

    fn set(&self, value: i64) -> Result<(), SinkError> {
        (**self).set(value)
    }

    fn toggle_mute(&self) -> Result<bool, SinkError> {
        (**self).toggle_mute()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

pub fn open_sink(
    settings: &MixerSettings,
    device: &str,
    element: &str,
) -> Result<Box<dyn VolumeSink>> {
    match settings.backend {
        MixerBackend::Amixer => {
            if settings.units == MixerUnits::Db {
                anyhow::bail!("the amixer backend only supports raw units");
            }
            Ok(Box::new(super::amixer::AmixerSink::new(device, element)))
        }
        #[cfg(feature = "hardware")]
        MixerBackend::Alsa => Ok(Box::new(super::alsa_mixer::AlsaMixerSink::new(
            device,
            element,
            settings.units,
        ))),
        #[cfg(not(feature = "hardware"))]
        MixerBackend::Alsa => Err(anyhow::anyhow!(
            "ALSA support disabled. Enable the `hardware` feature or use the amixer backend."
        )),
    }
}
