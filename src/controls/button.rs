use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ButtonSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonTiming {
    pub debounce: Duration,
    pub hold_mute: Duration,
    /// Releases past this (and not past `hold_off`) request a reboot.
    pub reboot: Option<Duration>,
    pub hold_off: Option<Duration>,
}

impl ButtonTiming {
    pub fn from_settings(settings: &ButtonSettings) -> Self {
        Self {
            debounce: Duration::from_millis(settings.debounce_ms),
            hold_mute: Duration::from_millis(settings.hold_mute_ms),
            reboot: (!settings.reboot_command.is_empty())
                .then(|| Duration::from_millis(settings.reboot_after_ms)),
            hold_off: Some(Duration::from_millis(settings.hold_off_ms)),
        }
    }

    /// Panel buttons: same debounce and click window, no system actions.
    pub fn click_only(settings: &ButtonSettings) -> Self {
        Self {
            reboot: None,
            hold_off: None,
            ..Self::from_settings(settings)
        }
    }
}

impl Default for ButtonTiming {
    fn default() -> Self {
        Self::from_settings(&ButtonSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    /// Released after the debounce time and before the hold-mute time.
    Click,
    /// Still held once the hold-mute time passed. Reported once per press.
    HoldMute,
    Reboot,
    PowerOff,
}

/// Turns press/release edges into click and hold actions.
#[derive(Debug)]
pub struct ButtonController {
    timing: ButtonTiming,
    pressed_at: Option<Instant>,
    hold_reported: bool,
}

impl ButtonController {
    pub fn new(timing: ButtonTiming) -> Self {
        Self {
            timing,
            pressed_at: None,
            hold_reported: false,
        }
    }

    pub fn on_press(&mut self, now: Instant) {
        if self.pressed_at.is_none() {
            self.pressed_at = Some(now);
            self.hold_reported = false;
        }
    }

    pub fn on_tick(&mut self, now: Instant) -> Option<ButtonAction> {
        let pressed_at = self.pressed_at?;
        if self.hold_reported || now.duration_since(pressed_at) <= self.timing.hold_mute {
            return None;
        }
        self.hold_reported = true;
        Some(ButtonAction::HoldMute)
    }

    pub fn on_release(&mut self, now: Instant) -> Option<ButtonAction> {
        let pressed_at = self.pressed_at.take()?;
        let held = now.duration_since(pressed_at);
        debug!(held_ms = held.as_millis() as u64, "button released");

        let past = |limit: Option<Duration>| limit.is_some_and(|limit| held > limit);
        if past(self.timing.hold_off) {
            Some(ButtonAction::PowerOff)
        } else if past(self.timing.reboot) {
            Some(ButtonAction::Reboot)
        } else if held > self.timing.debounce && held < self.timing.hold_mute {
            Some(ButtonAction::Click)
        } else {
            None
        }
    }
}
