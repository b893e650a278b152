#[cfg_attr(not(feature = "hardware"), path = "stub.rs")]
mod backend;
pub mod quadrature;

use std::time::Duration;

use anyhow::Result;

use crate::config::AppConfig;
use crate::system::lirc::RemoteKey;

pub use backend::{HardwareHandle, start};
pub use quadrature::{EncoderPosition, PinLevels, QuadratureDecoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioConfig {
    pub encoder: Option<(u8, u8)>,
    pub button: Option<u8>,
    pub button_debounce: Duration,
    pub amp_mute: Option<u8>,
    /// `(button, led)` pairs for the panel buttons, in configuration order.
    pub panel: Vec<(u8, Option<u8>)>,
}

impl GpioConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            encoder: config
                .encoder
                .as_ref()
                .map(|encoder| (encoder.pin_a, encoder.pin_b)),
            button: config.button.as_ref().map(|button| button.pin),
            button_debounce: Duration::from_millis(config.shared_button_settings().debounce_ms),
            amp_mute: config.button.as_ref().and_then(|button| button.amp_mute_pin),
            panel: config
                .buttons
                .iter()
                .map(|button| (button.pin, button.led_pin))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.encoder.is_none()
            && self.button.is_none()
            && self.amp_mute.is_none()
            && self.panel.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonId {
    Main,
    /// Index into the configured panel buttons.
    Panel(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    ButtonPressed(ButtonId),
    ButtonReleased(ButtonId),
    Remote(RemoteKey),
}

/// Amplifier mute line (GPIO 22 on the AMP+ / DigiAMP+).
pub trait AmpControl {
    fn set_amp_muted(&self, muted: bool) -> Result<()>;
}

/// LEDs paired with the panel buttons, addressed by panel index.
pub trait LedControl {
    fn toggle_led(&self, index: usize) -> Result<()>;
}
