use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::config::MixPreset;
use crate::system::mixer::{SinkError, VolumeSink};

/// Writes every preset, logging failures, and fails if any of them did.
pub fn apply_presets<F>(presets: &[MixPreset], mut open: F) -> Result<()>
where
    F: FnMut(&MixPreset) -> Result<Box<dyn VolumeSink>>,
{
    let mut failed = Vec::new();
    for preset in presets {
        let outcome = open(preset)
            .and_then(|sink| apply_preset(sink.as_ref(), preset).map_err(Into::into));
        match outcome {
            Ok(previous) => info!(
                device = %preset.device,
                element = %preset.element,
                previous,
                value = preset.value,
                "mixer preset applied"
            ),
            Err(err) => {
                warn!(
                    error = %err,
                    device = %preset.device,
                    element = %preset.element,
                    "failed to apply mixer preset"
                );
                failed.push(preset.element.as_str());
            }
        }
    }

    if !failed.is_empty() {
        bail!("failed to apply mixer presets: {}", failed.join(", "));
    }
    Ok(())
}

fn apply_preset(sink: &dyn VolumeSink, preset: &MixPreset) -> Result<i64, SinkError> {
    let previous = sink.get()?;
    sink.set(preset.value)?;
    Ok(previous)
}
