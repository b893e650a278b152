use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::system::lirc;
use crate::system::mixer::{MixerBackend, MixerUnits};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mixer: MixerSettings,
    pub poll_interval_ms: u64,
    pub encoder: Option<EncoderSettings>,
    pub button: Option<ButtonSettings>,
    /// Extra front panel buttons, each optionally paired with an LED.
    pub buttons: Vec<PanelButtonSettings>,
    pub remote: Option<RemoteSettings>,
    pub mix_presets: Vec<MixPreset>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mixer: MixerSettings::default(),
            poll_interval_ms: 250,
            encoder: Some(EncoderSettings::default()),
            button: None,
            buttons: Vec::new(),
            remote: None,
            mix_presets: default_mix_presets(),
        }
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("`poll_interval_ms` must be greater than zero");
        }
        if self.mixer.step() <= 0 {
            bail!("`mixer.step` must be positive");
        }
        if self.mixer.backend == MixerBackend::Amixer && self.mixer.units == MixerUnits::Db {
            bail!("`mixer.units = \"db\"` requires the alsa backend");
        }
        if let Some(encoder) = &self.encoder {
            if encoder.pin_a == encoder.pin_b {
                bail!("encoder lines must use two different GPIOs");
            }
        }
        if let Some(button) = &self.button {
            if button.hold_off_ms < button.hold_mute_ms {
                bail!("`button.hold_off_ms` must not be shorter than `button.hold_mute_ms`");
            }
            if !button.reboot_command.is_empty()
                && (button.reboot_after_ms <= button.debounce_ms
                    || button.reboot_after_ms >= button.hold_off_ms)
            {
                bail!("`button.reboot_after_ms` must lie between the debounce and hold-off times");
            }
        }
        self.check_pins()
    }

    /// Settings shared by every push button; the main button's when present.
    pub fn shared_button_settings(&self) -> ButtonSettings {
        self.button.clone().unwrap_or_default()
    }

    fn check_pins(&self) -> Result<()> {
        let mut claimed: Vec<u8> = Vec::new();
        let encoder = self
            .encoder
            .iter()
            .flat_map(|encoder| [encoder.pin_a, encoder.pin_b]);
        let button = self
            .button
            .iter()
            .flat_map(|button| std::iter::once(button.pin).chain(button.amp_mute_pin));
        let panel = self
            .buttons
            .iter()
            .flat_map(|button| std::iter::once(button.pin).chain(button.led_pin));

        for pin in encoder.chain(button).chain(panel) {
            if claimed.contains(&pin) {
                bail!("GPIO {pin} is assigned more than once");
            }
            claimed.push(pin);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerSettings {
    pub backend: MixerBackend,
    pub device: String,
    pub element: String,
    pub units: MixerUnits,
    #[serde(rename = "step")]
    pub step_override: Option<i64>,
    pub muted_sentinel: Option<i64>,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            backend: MixerBackend::default(),
            device: String::from("default"),
            element: String::from("Digital"),
            units: MixerUnits::Raw,
            step_override: None,
            muted_sentinel: None,
        }
    }
}

impl MixerSettings {
    pub fn step(&self) -> i64 {
        self.step_override
            .unwrap_or_else(|| self.units.default_step())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub pin_a: u8,
    pub pin_b: u8,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            pin_a: 23,
            pin_b: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ButtonSettings {
    pub pin: u8,
    pub amp_mute_pin: Option<u8>,
    pub debounce_ms: u64,
    pub hold_mute_ms: u64,
    pub hold_off_ms: u64,
    pub power_off_command: Vec<String>,
    /// Release after this long (but before hold-off) runs `reboot_command`.
    pub reboot_after_ms: u64,
    /// Empty disables the reboot tier.
    pub reboot_command: Vec<String>,
}

impl Default for ButtonSettings {
    fn default() -> Self {
        Self {
            pin: 27,
            amp_mute_pin: None,
            debounce_ms: 30,
            hold_mute_ms: 4_000,
            hold_off_ms: 6_000,
            power_off_command: Vec::new(),
            reboot_after_ms: 1_000,
            reboot_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PanelButtonSettings {
    pub pin: u8,
    #[serde(default)]
    pub led_pin: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub socket: PathBuf,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            socket: lirc::default_socket(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MixPreset {
    #[serde(default = "default_preset_device")]
    pub device: String,
    pub element: String,
    pub value: i64,
}

fn default_preset_device() -> String {
    String::from("hw:CARD=IQaudIODAC")
}

/// 2 Vrms line output on the PCM512x based boards.
fn default_mix_presets() -> Vec<MixPreset> {
    ["Analogue", "Analogue Playback Boost"]
        .into_iter()
        .map(|element| MixPreset {
            device: default_preset_device(),
            element: element.to_string(),
            value: 1,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: Option<PathBuf>,
    pub config: AppConfig,
}

pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = read_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config,
        });
    }

    for candidate in default_config_paths() {
        if !candidate.exists() {
            continue;
        }
        let config = read_config(&candidate)?;
        return Ok(LoadedConfig {
            path: Some(candidate),
            config,
        });
    }

    Ok(LoadedConfig {
        path: None,
        config: AppConfig::default(),
    })
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration at {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("failed to parse configuration at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str) -> Result<AppConfig> {
    serde_json::from_str(contents).context("configuration file is not valid JSON")
}

pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("iqaudio_ctrl").join(CONFIG_FILE));
    }

    if let Some(home) = env::var_os("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".config/iqaudio_ctrl")
                .join(CONFIG_FILE),
        );
    }

    paths.push(PathBuf::from("/etc/iqaudio_ctrl").join(CONFIG_FILE));
    paths.push(PathBuf::from(CONFIG_FILE));
    paths
}
