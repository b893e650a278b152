use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use tracing::{debug, warn};

use super::availability::RetryableAvailability;
use super::mixer::{SinkError, VolumeRange, VolumeSink};

const RETRY_BACKOFF: Duration = Duration::from_secs(5);

static LIMITS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Limits:\s*(?:Playback\s+)?(-?\d+)\s*-\s*(-?\d+)").unwrap());
static LEVEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:Front Left|Mono):\s*Playback\s+(-?\d+)").unwrap()
});
static SWITCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:Front Left|Mono):\s*Playback\b.*\[(on|off)\]").unwrap()
});

/// Mixer element driven through the `amixer` command line tool.
pub struct AmixerSink {
    device: String,
    element: String,
    range: OnceCell<VolumeRange>,
    availability: Arc<RetryableAvailability>,
}

impl AmixerSink {
    pub fn new(device: impl Into<String>, element: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            element: element.into(),
            range: OnceCell::new(),
            availability: Arc::new(RetryableAvailability::new(true, RETRY_BACKOFF)),
        }
    }

    fn run_amixer(&self, args: &[&str]) -> Result<String, SinkError> {
        if !self.availability.try_acquire() {
            return Err(SinkError::unavailable(format!(
                "amixer disabled for {} after an earlier failure",
                self.element
            )));
        }

        let output = Command::new("amixer")
            .arg("-D")
            .arg(&self.device)
            .args(args)
            .output()
            .map_err(|err| {
                self.mark_unavailable(&err.to_string());
                SinkError::unavailable(format!("failed to execute amixer: {err}"))
            })?;

        if !output.status.success() {
            let message = format!(
                "amixer exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            self.mark_unavailable(&message);
            return Err(SinkError::Unavailable(message));
        }

        if self.availability.mark_available() {
            debug!(element = %self.element, "amixer backend available again");
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn sget(&self) -> Result<String, SinkError> {
        self.run_amixer(&["sget", &self.element])
    }

    fn mark_unavailable(&self, reason: &str) {
        if self.availability.mark_unavailable() {
            warn!(
                element = %self.element,
                device = %self.device,
                "amixer backend disabled ({reason}); retrying in {}s",
                RETRY_BACKOFF.as_secs()
            );
        }
    }
}

impl VolumeSink for AmixerSink {
    fn range(&self) -> Result<VolumeRange, SinkError> {
        self.range
            .get_or_try_init(|| parse_limits(&self.sget()?))
            .copied()
    }

    fn get(&self) -> Result<i64, SinkError> {
        parse_level(&self.sget()?)
    }

    fn set(&self, value: i64) -> Result<(), SinkError> {
        let range = self.range()?;
        range.check(value)?;
        let value = value.max(range.min).to_string();
        self.run_amixer(&sset_args(&self.element, &value))
            .map(|_| ())
    }

    fn toggle_mute(&self) -> Result<bool, SinkError> {
        self.run_amixer(&["-q", "sset", &self.element, "toggle"])?;
        parse_switch(&self.sget()?)
    }

    fn describe(&self) -> String {
        format!("amixer {} '{}'", self.device, self.element)
    }
}

/// `--` keeps negative levels from being read as options.
fn sset_args<'a>(element: &'a str, value: &'a str) -> [&'a str; 5] {
    ["-q", "--", "sset", element, value]
}

fn parse_limits(output: &str) -> Result<VolumeRange, SinkError> {
    let captures = LIMITS_RE
        .captures(output)
        .ok_or_else(|| SinkError::unavailable("amixer output has no playback limits"))?;
    let min = parse_number(&captures[1])?;
    let max = parse_number(&captures[2])?;
    Ok(VolumeRange::new(min, max))
}

fn parse_level(output: &str) -> Result<i64, SinkError> {
    let captures = LEVEL_RE
        .captures(output)
        .ok_or_else(|| SinkError::unavailable("amixer output has no playback level"))?;
    parse_number(&captures[1])
}

fn parse_switch(output: &str) -> Result<bool, SinkError> {
    let captures = SWITCH_RE
        .captures(output)
        .ok_or_else(|| SinkError::unavailable("element has no playback switch"))?;
    Ok(&captures[1] == "off")
}

fn parse_number(text: &str) -> Result<i64, SinkError> {
    text.parse::<i64>()
        .map_err(|err| SinkError::unavailable(format!("unexpected amixer value {text:?}: {err}")))
}
