use std::cell::RefCell;
use std::time::Duration;

use alsa::Round;
use alsa::mixer::{MilliBel, Mixer, Selem, SelemChannelId, SelemId};
use tracing::{info, warn};

use super::availability::RetryableAvailability;
use super::mixer::{MixerUnits, SinkError, VolumeRange, VolumeSink};

const REOPEN_BACKOFF: Duration = Duration::from_secs(5);

/// Simple mixer element accessed through alsa-lib. The mixer handle is opened
/// on first use and dropped after any failure so the next attempt reattaches.
pub struct AlsaMixerSink {
    device: String,
    element: String,
    units: MixerUnits,
    mixer: RefCell<Option<Mixer>>,
    availability: RetryableAvailability,
}

impl AlsaMixerSink {
    pub fn new(device: impl Into<String>, element: impl Into<String>, units: MixerUnits) -> Self {
        Self {
            device: device.into(),
            element: element.into(),
            units,
            mixer: RefCell::new(None),
            availability: RetryableAvailability::new(true, REOPEN_BACKOFF),
        }
    }

    fn with_selem<T>(
        &self,
        op: impl FnOnce(&Selem<'_>) -> alsa::Result<T>,
    ) -> Result<T, SinkError> {
        if !self.availability.try_acquire() {
            return Err(SinkError::unavailable(format!(
                "{} is waiting to be reopened",
                self.describe()
            )));
        }

        let mut slot = self.mixer.borrow_mut();
        if slot.is_none() {
            match Mixer::new(&self.device, false) {
                Ok(mixer) => *slot = Some(mixer),
                Err(err) => {
                    self.mark_unavailable(&err.to_string());
                    return Err(SinkError::unavailable(format!(
                        "failed to open mixer {}: {err}",
                        self.device
                    )));
                }
            }
        }

        let result = match slot.as_ref() {
            Some(mixer) => run_on_element(mixer, &self.element, op),
            None => Err(String::from("mixer handle missing")),
        };

        match result {
            Ok(value) => {
                if self.availability.mark_available() {
                    info!(mixer = %self.describe(), "mixer reopened");
                }
                Ok(value)
            }
            Err(message) => {
                *slot = None;
                self.mark_unavailable(&message);
                Err(SinkError::Unavailable(message))
            }
        }
    }

    fn mark_unavailable(&self, reason: &str) {
        if self.availability.mark_unavailable() {
            warn!(
                mixer = %self.describe(),
                "ALSA mixer unavailable ({reason}); retrying in {}s",
                REOPEN_BACKOFF.as_secs()
            );
        }
    }
}

fn run_on_element<T>(
    mixer: &Mixer,
    element: &str,
    op: impl FnOnce(&Selem<'_>) -> alsa::Result<T>,
) -> Result<T, String> {
    // Pick up changes made by other clients (alsamixer, amixer) first.
    mixer
        .handle_events()
        .map_err(|err| format!("failed to refresh mixer: {err}"))?;
    let selem = mixer
        .find_selem(&SelemId::new(element, 0))
        .ok_or_else(|| format!("mixer element '{element}' not found"))?;
    op(&selem).map_err(|err| format!("mixer element '{element}': {err}"))
}

impl VolumeSink for AlsaMixerSink {
    fn range(&self) -> Result<VolumeRange, SinkError> {
        let units = self.units;
        self.with_selem(|selem| {
            let (min, max) = selem.get_playback_volume_range();
            match units {
                MixerUnits::Raw => Ok(VolumeRange::new(min, max)),
                MixerUnits::Db => {
                    let (MilliBel(min_db), MilliBel(max_db)) = selem.get_playback_db_range();
                    let MilliBel(usable_db) = selem.ask_playback_vol_db((min + 1).min(max))?;
                    Ok(VolumeRange::with_usable_min(min_db, max_db, usable_db))
                }
            }
        })
    }

    fn get(&self) -> Result<i64, SinkError> {
        let units = self.units;
        self.with_selem(|selem| match units {
            MixerUnits::Raw => selem.get_playback_volume(SelemChannelId::FrontLeft),
            MixerUnits::Db => selem
                .get_playback_vol_db(SelemChannelId::FrontLeft)
                .map(|MilliBel(value)| value),
        })
    }

    fn set(&self, value: i64) -> Result<(), SinkError> {
        let range = self.range()?;
        range.check(value)?;
        let units = self.units;
        self.with_selem(|selem| match units {
            MixerUnits::Raw => selem.set_playback_volume_all(value.max(range.min)),
            MixerUnits::Db if value <= range.min => {
                let (floor, _) = selem.get_playback_volume_range();
                selem.set_playback_volume_all(floor)
            }
            MixerUnits::Db => selem.set_playback_db_all(MilliBel(value), Round::Floor),
        })
    }

    fn toggle_mute(&self) -> Result<bool, SinkError> {
        let element = self.element.clone();
        let outcome = self.with_selem(|selem| {
            if !selem.has_playback_switch() {
                return Ok(None);
            }
            let on = selem.get_playback_switch(SelemChannelId::FrontLeft)?;
            let next = if on != 0 { 0 } else { 1 };
            selem.set_playback_switch_all(next)?;
            Ok(Some(next == 0))
        })?;
        outcome.ok_or_else(|| {
            SinkError::unavailable(format!("mixer element '{element}' has no playback switch"))
        })
    }

    fn describe(&self) -> String {
        format!("{} '{}'", self.device, self.element)
    }
}
