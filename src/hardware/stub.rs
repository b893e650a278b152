#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;

use super::{AmpControl, GpioConfig, InputEvent, LedControl, QuadratureDecoder};

#[derive(Clone, Debug, Default)]
pub struct HardwareHandle;

impl AmpControl for HardwareHandle {
    fn set_amp_muted(&self, _muted: bool) -> Result<()> {
        Err(anyhow!("GPIO support disabled"))
    }
}

impl LedControl for HardwareHandle {
    fn toggle_led(&self, _index: usize) -> Result<()> {
        Err(anyhow!("GPIO support disabled"))
    }
}

pub fn start(
    _: &GpioConfig,
    _: Arc<QuadratureDecoder>,
    _: Sender<InputEvent>,
) -> Result<HardwareHandle> {
    Err(anyhow!(
        "GPIO support disabled. Enable the `hardware` feature to read the encoder and button."
    ))
}
