use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, trace, warn};

use super::availability::RetryableAvailability;
use crate::config::RemoteSettings;
use crate::hardware::InputEvent;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

// <code> <repeat> <key name> <remote name>
static PACKET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-fA-F]+)\s+([0-9a-fA-F]+)\s+(\S+)\s+(\S+)\s*$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKey {
    VolumeUp,
    VolumeDown,
    Mute,
}

impl RemoteKey {
    pub fn from_key_name(name: &str) -> Option<Self> {
        match name {
            "KEY_VOLUMEUP" => Some(Self::VolumeUp),
            "KEY_VOLUMEDOWN" => Some(Self::VolumeDown),
            "KEY_MUTE" => Some(Self::Mute),
            _ => None,
        }
    }

    /// Decodes one line broadcast by lircd. Lines that are not in the usual
    /// four-field format are matched by substring.
    pub fn from_line(line: &str) -> Option<Self> {
        if let Some(captures) = PACKET_RE.captures(line.trim_end()) {
            return Self::from_key_name(&captures[3]);
        }
        [
            ("KEY_MUTE", Self::Mute),
            ("KEY_VOLUMEUP", Self::VolumeUp),
            ("KEY_VOLUMEDOWN", Self::VolumeDown),
        ]
        .into_iter()
        .find(|(name, _)| line.contains(name))
        .map(|(_, key)| key)
    }
}

pub fn start(settings: RemoteSettings, events: Sender<InputEvent>) -> Result<()> {
    thread::Builder::new()
        .name("lirc-client".into())
        .spawn(move || {
            run_client(&settings.socket, &events);
            debug!("lirc client stopped");
        })
        .context("failed to spawn lirc client")?;
    Ok(())
}

fn run_client(socket: &Path, events: &Sender<InputEvent>) {
    let availability = RetryableAvailability::new(false, RECONNECT_BACKOFF);
    let mut warned = false;

    loop {
        match UnixStream::connect(socket) {
            Ok(stream) => {
                if availability.mark_available() {
                    info!(socket = %socket.display(), "connected to lircd");
                }
                warned = false;
                match pump(stream, events) {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(err) => warn!(error = %err, "lircd connection failed"),
                }
                availability.mark_unavailable();
                warn!(socket = %socket.display(), "lircd connection closed; reconnecting");
            }
            Err(err) => {
                if !warned {
                    warn!(
                        error = %err,
                        socket = %socket.display(),
                        "cannot reach lircd; remote control disabled until it appears"
                    );
                    warned = true;
                }
                availability.mark_unavailable();
            }
        }
        thread::sleep(availability.backoff());
    }
}

/// Forwards keys until the socket closes. Returns `false` once nobody is
/// listening for events any more.
fn pump(stream: UnixStream, events: &Sender<InputEvent>) -> Result<bool> {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line.context("failed to read from lircd socket")?;
        trace!(line = %line, "lircd packet");
        let Some(key) = RemoteKey::from_line(&line) else {
            debug!(line = %line, "ignoring remote key");
            continue;
        };
        if events.send(InputEvent::Remote(key)).is_err() {
            error!("input event channel closed; stopping lirc client");
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn default_socket() -> PathBuf {
    PathBuf::from("/var/run/lirc/lircd")
}
