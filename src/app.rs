use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::controls::{
    ButtonAction, ButtonController, ButtonTiming, Direction, VolumeController, VolumePolicy,
};
use crate::hardware::{
    AmpControl, ButtonId, EncoderPosition, GpioConfig, HardwareHandle, InputEvent, LedControl,
    QuadratureDecoder, start as start_hardware,
};
use crate::system::lirc::{self, RemoteKey};
use crate::system::mixer::{VolumeSink, open_sink};

pub struct App {
    volume: VolumeController<Box<dyn VolumeSink>>,
    position: EncoderPosition,
    button: Option<ButtonController>,
    panel: Vec<ButtonController>,
    amp: Option<Box<dyn AmpControl>>,
    amp_muted: bool,
    leds: Option<Box<dyn LedControl>>,
    power_off_command: Vec<String>,
    reboot_command: Vec<String>,
    poll_interval: Duration,
    // Keeps the GPIO lines claimed for the lifetime of the loop.
    _hardware: Option<HardwareHandle>,
    events: Receiver<InputEvent>,
    events_tx: Sender<InputEvent>,
    shutdown: Option<Receiver<()>>,
}

/// Pieces the control loop is assembled from.
pub struct AppParts {
    pub sink: Box<dyn VolumeSink>,
    pub policy: VolumePolicy,
    pub position: EncoderPosition,
    pub button: Option<ButtonTiming>,
    pub panel: Vec<ButtonTiming>,
    pub amp: Option<Box<dyn AmpControl>>,
    pub leds: Option<Box<dyn LedControl>>,
    pub power_off_command: Vec<String>,
    pub reboot_command: Vec<String>,
    pub poll_interval: Duration,
}

impl App {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let sink = open_sink(&config.mixer, &config.mixer.device, &config.mixer.element)
            .context("failed to open volume control")?;

        let shared = config.shared_button_settings();
        let position = EncoderPosition::default();
        let decoder = Arc::new(QuadratureDecoder::new(position.clone()));
        let app = Self::from_parts(AppParts {
            sink,
            policy: VolumePolicy::from_settings(&config.mixer),
            position,
            button: config.button.as_ref().map(ButtonTiming::from_settings),
            panel: vec![ButtonTiming::click_only(&shared); config.buttons.len()],
            amp: None,
            leds: None,
            power_off_command: shared.power_off_command.clone(),
            reboot_command: shared.reboot_command.clone(),
            poll_interval: config.poll_interval(),
        });

        let gpio = GpioConfig::from_app_config(config);
        let hardware = if gpio.is_empty() {
            info!("no GPIO lines configured");
            None
        } else {
            info!("starting GPIO backend");
            Some(start_hardware(&gpio, decoder, app.event_sender())?)
        };
        let amp = match (&hardware, gpio.amp_mute) {
            (Some(handle), Some(_)) => Some(Box::new(handle.clone()) as Box<dyn AmpControl>),
            _ => None,
        };
        let leds = match &hardware {
            Some(handle) if !gpio.panel.is_empty() => {
                Some(Box::new(handle.clone()) as Box<dyn LedControl>)
            }
            _ => None,
        };

        if let Some(remote) = config.remote.clone() {
            info!(socket = %remote.socket.display(), "starting lirc client");
            lirc::start(remote, app.event_sender())?;
        }

        Ok(Self {
            amp,
            leds,
            _hardware: hardware,
            ..app
        })
    }

    pub fn from_parts(parts: AppParts) -> Self {
        let volume = VolumeController::new(parts.sink, parts.policy, parts.position.get());
        let (events_tx, events) = crossbeam_channel::unbounded();
        Self {
            volume,
            position: parts.position,
            button: parts.button.map(ButtonController::new),
            panel: parts.panel.into_iter().map(ButtonController::new).collect(),
            amp: parts.amp,
            amp_muted: false,
            leds: parts.leds,
            power_off_command: parts.power_off_command,
            reboot_command: parts.reboot_command,
            poll_interval: parts.poll_interval,
            _hardware: None,
            events,
            events_tx,
            shutdown: None,
        }
    }

    pub fn event_sender(&self) -> Sender<InputEvent> {
        self.events_tx.clone()
    }

    pub fn set_shutdown_channel(&mut self, shutdown: Receiver<()>) {
        self.shutdown = Some(shutdown);
    }

    pub fn run(&mut self) -> Result<()> {
        let ticker = crossbeam_channel::tick(self.poll_interval);
        let events = self.events.clone();
        let shutdown = self
            .shutdown
            .clone()
            .unwrap_or_else(crossbeam_channel::never);

        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            "control loop started"
        );
        loop {
            crossbeam_channel::select! {
                recv(ticker) -> _ => self.on_tick(Instant::now()),
                // `events_tx` lives in `self`, so this never disconnects.
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.handle_event(event, Instant::now());
                    }
                }
                recv(shutdown) -> _ => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        info!(position = self.volume.last_position(), "control loop stopped");
        Ok(())
    }

    fn on_tick(&mut self, now: Instant) {
        let position = self.position.get();
        if let Err(err) = self.volume.poll(position) {
            warn!(error = %err, position, "volume change skipped");
        }

        if let Some(action) = self.button.as_mut().and_then(|button| button.on_tick(now)) {
            self.perform(action);
        }
    }

    fn handle_event(&mut self, event: InputEvent, now: Instant) {
        match event {
            InputEvent::ButtonPressed(id) => {
                if let Some(button) = self.button_mut(id) {
                    button.on_press(now);
                }
            }
            InputEvent::ButtonReleased(ButtonId::Main) => {
                let action = self
                    .button
                    .as_mut()
                    .and_then(|button| button.on_release(now));
                if let Some(action) = action {
                    self.perform(action);
                }
            }
            InputEvent::ButtonReleased(ButtonId::Panel(index)) => {
                let action = self
                    .panel
                    .get_mut(index)
                    .and_then(|button| button.on_release(now));
                if action == Some(ButtonAction::Click) {
                    self.toggle_led(index);
                }
            }
            InputEvent::Remote(key) => {
                debug!(?key, "remote key");
                match key {
                    RemoteKey::VolumeUp => self.step(Direction::Up),
                    RemoteKey::VolumeDown => self.step(Direction::Down),
                    RemoteKey::Mute => self.toggle_mute(),
                }
            }
        }
    }

    fn button_mut(&mut self, id: ButtonId) -> Option<&mut ButtonController> {
        match id {
            ButtonId::Main => self.button.as_mut(),
            ButtonId::Panel(index) => self.panel.get_mut(index),
        }
    }

    fn step(&mut self, direction: Direction) {
        if let Err(err) = self.volume.step(direction) {
            warn!(error = %err, ?direction, "volume change skipped");
        }
    }

    /// Flips the playback switch and keeps the amplifier line in step with
    /// it. Without a usable switch the amplifier line is toggled on its own.
    fn toggle_mute(&mut self) {
        let muted = match self.volume.toggle_mute() {
            Ok(muted) => muted,
            Err(err) => {
                warn!(error = %err, "failed to toggle playback switch");
                !self.amp_muted
            }
        };
        if self.amp.is_some() && muted != self.amp_muted {
            self.set_amp_muted(muted);
        }
    }

    fn perform(&mut self, action: ButtonAction) {
        info!(?action, "button action");
        match action {
            ButtonAction::Click => self.toggle_mute(),
            ButtonAction::HoldMute => self.set_amp_muted(true),
            ButtonAction::Reboot => run_command("reboot", &self.reboot_command),
            ButtonAction::PowerOff => run_command("power-off", &self.power_off_command),
        }
    }

    fn set_amp_muted(&mut self, muted: bool) {
        let Some(amp) = self.amp.as_ref() else {
            debug!(muted, "no amplifier mute line");
            return;
        };
        match amp.set_amp_muted(muted) {
            Ok(()) => {
                self.amp_muted = muted;
                info!(muted, "amplifier mute line set");
            }
            Err(err) => warn!(error = %err, muted, "failed to drive amplifier mute line"),
        }
    }

    fn toggle_led(&self, index: usize) {
        info!(index, "panel button clicked");
        if let Some(leds) = self.leds.as_ref() {
            if let Err(err) = leds.toggle_led(index) {
                warn!(error = %err, index, "failed to toggle panel LED");
            }
        }
    }
}

/// Starts `command` in the background and reaps it on a helper thread.
fn run_command(label: &str, command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        warn!("{label} requested but no command is configured");
        return;
    };

    let mut child = match Command::new(program).args(args).spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(error = %err, %program, "failed to run {label} command");
            return;
        }
    };
    info!(pid = child.id(), %program, ?args, "{label} command started");

    let label = label.to_string();
    let program = program.clone();
    let reaper = thread::Builder::new()
        .name("system-command".into())
        .spawn(move || match child.wait() {
            Ok(status) if status.success() => debug!(%program, "{label} command finished"),
            Ok(status) => warn!(%status, %program, "{label} command failed"),
            Err(err) => warn!(error = %err, %program, "failed to wait for {label} command"),
        });
    if let Err(err) = reaper {
        warn!(error = %err, "failed to spawn command reaper");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::PinLevels;
    use crate::system::mixer::MixerUnits;
    use crate::system::mixer::tests::{MockSink, MockSinkState};

    use std::path::Path;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct RecordingAmp {
        calls: Arc<Mutex<Vec<bool>>>,
    }

    impl AmpControl for RecordingAmp {
        fn set_amp_muted(&self, muted: bool) -> Result<()> {
            self.calls.lock().unwrap().push(muted);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingLeds {
        toggled: Arc<Mutex<Vec<usize>>>,
    }

    impl LedControl for RecordingLeds {
        fn toggle_led(&self, index: usize) -> Result<()> {
            self.toggled.lock().unwrap().push(index);
            Ok(())
        }
    }

    struct BrokenAmp;

    impl AmpControl for BrokenAmp {
        fn set_amp_muted(&self, _muted: bool) -> Result<()> {
            Err(anyhow!("line busy"))
        }
    }

    fn parts(sink: &MockSink, position: &EncoderPosition) -> AppParts {
        AppParts {
            sink: Box::new(sink.clone()),
            policy: VolumePolicy {
                step: 10,
                units: MixerUnits::Raw,
                muted_sentinel: Some(-1),
            },
            position: position.clone(),
            button: None,
            panel: Vec::new(),
            amp: None,
            leds: None,
            power_off_command: Vec::new(),
            reboot_command: Vec::new(),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn with_amp(sink: &MockSink, amp: &RecordingAmp) -> App {
        App::from_parts(AppParts {
            button: Some(ButtonTiming::default()),
            amp: Some(Box::new(amp.clone())),
            ..parts(sink, &EncoderPosition::default())
        })
    }

    fn click(app: &mut App, id: ButtonId, at: Instant, held_ms: u64) {
        app.handle_event(InputEvent::ButtonPressed(id), at);
        app.handle_event(
            InputEvent::ButtonReleased(id),
            at + Duration::from_millis(held_ms),
        );
    }

    fn touch(marker: &Path) -> Vec<String> {
        vec![
            String::from("touch"),
            marker.to_string_lossy().into_owned(),
        ]
    }

    fn wait_for(marker: &Path) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !marker.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        marker.exists()
    }

    #[test]
    fn encoder_detent_becomes_one_volume_step() {
        let sink = MockSink::default();
        let position = EncoderPosition::default();
        let decoder = QuadratureDecoder::new(position.clone());
        let mut app = App::from_parts(parts(&sink, &position));

        app.on_tick(Instant::now());
        assert!(sink.writes().is_empty());

        for (a, b) in [(true, false), (true, true), (false, true), (false, false)] {
            decoder.on_edge(PinLevels::new(a, b));
        }
        assert_eq!(position.get(), 4);

        app.on_tick(Instant::now());
        app.on_tick(Instant::now());
        assert_eq!(sink.writes(), vec![60]);
    }

    #[test]
    fn remote_keys_step_and_mute() {
        let sink = MockSink::default();
        let position = EncoderPosition::default();
        let mut app = App::from_parts(parts(&sink, &position));
        let now = Instant::now();

        app.handle_event(InputEvent::Remote(RemoteKey::VolumeUp), now);
        app.handle_event(InputEvent::Remote(RemoteKey::VolumeDown), now);
        app.handle_event(InputEvent::Remote(RemoteKey::VolumeDown), now);
        app.handle_event(InputEvent::Remote(RemoteKey::Mute), now);

        assert_eq!(sink.writes(), vec![60, 50, 40]);
        assert!(sink.inner.lock().unwrap().switch_muted);
    }

    #[test]
    fn button_click_toggles_switch_and_amp() {
        let sink = MockSink::default();
        let amp = RecordingAmp::default();
        let mut app = with_amp(&sink, &amp);
        let start = Instant::now();

        click(&mut app, ButtonId::Main, start, 150);
        assert!(sink.inner.lock().unwrap().switch_muted);
        click(&mut app, ButtonId::Main, start + Duration::from_secs(1), 200);

        assert!(!sink.inner.lock().unwrap().switch_muted);
        assert_eq!(*amp.calls.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn long_hold_mutes_amp_once() {
        let sink = MockSink::default();
        let amp = RecordingAmp::default();
        let mut app = with_amp(&sink, &amp);
        let start = Instant::now();

        app.handle_event(InputEvent::ButtonPressed(ButtonId::Main), start);
        app.on_tick(start + Duration::from_millis(4_100));
        app.on_tick(start + Duration::from_millis(4_400));
        app.handle_event(
            InputEvent::ButtonReleased(ButtonId::Main),
            start + Duration::from_millis(4_500),
        );

        assert_eq!(*amp.calls.lock().unwrap(), vec![true]);
        assert!(!sink.inner.lock().unwrap().switch_muted);
    }

    #[test]
    fn clicks_after_a_hold_keep_switch_and_amp_together() {
        let sink = MockSink::default();
        let amp = RecordingAmp::default();
        let mut app = with_amp(&sink, &amp);
        let start = Instant::now();

        app.handle_event(InputEvent::ButtonPressed(ButtonId::Main), start);
        app.on_tick(start + Duration::from_millis(4_100));
        app.handle_event(
            InputEvent::ButtonReleased(ButtonId::Main),
            start + Duration::from_millis(4_500),
        );
        assert!(app.amp_muted);

        click(&mut app, ButtonId::Main, start + Duration::from_secs(5), 200);
        assert!(sink.inner.lock().unwrap().switch_muted);
        assert!(app.amp_muted);

        click(&mut app, ButtonId::Main, start + Duration::from_secs(6), 200);
        assert!(!sink.inner.lock().unwrap().switch_muted);
        assert!(!app.amp_muted);
        assert_eq!(*amp.calls.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn click_without_mixer_switch_toggles_amp_alone() {
        let sink = MockSink::with_state(MockSinkState {
            no_switch: true,
            ..Default::default()
        });
        let amp = RecordingAmp::default();
        let mut app = with_amp(&sink, &amp);
        let start = Instant::now();

        app.handle_event(InputEvent::ButtonPressed(ButtonId::Main), start);
        app.on_tick(start + Duration::from_millis(4_100));
        app.handle_event(
            InputEvent::ButtonReleased(ButtonId::Main),
            start + Duration::from_millis(4_500),
        );
        click(&mut app, ButtonId::Main, start + Duration::from_secs(5), 200);

        assert!(!app.amp_muted);
        assert_eq!(*amp.calls.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn amp_failure_keeps_previous_state() {
        let sink = MockSink::default();
        let position = EncoderPosition::default();
        let mut app = App::from_parts(AppParts {
            button: Some(ButtonTiming::default()),
            amp: Some(Box::new(BrokenAmp)),
            ..parts(&sink, &position)
        });

        app.perform(ButtonAction::HoldMute);
        assert!(!app.amp_muted);
    }

    #[test]
    fn panel_button_clicks_toggle_their_led() {
        let sink = MockSink::default();
        let leds = RecordingLeds::default();
        let mut app = App::from_parts(AppParts {
            panel: vec![ButtonTiming::click_only(&Default::default()); 3],
            leds: Some(Box::new(leds.clone())),
            ..parts(&sink, &EncoderPosition::default())
        });
        let start = Instant::now();

        click(&mut app, ButtonId::Panel(1), start, 100);
        click(&mut app, ButtonId::Panel(2), start, 10);
        click(&mut app, ButtonId::Panel(2), start, 5_000);
        click(&mut app, ButtonId::Panel(0), start, 200);
        click(&mut app, ButtonId::Panel(7), start, 200);

        assert_eq!(*leds.toggled.lock().unwrap(), vec![1, 0]);
        assert!(!sink.inner.lock().unwrap().switch_muted);
    }

    #[test]
    fn power_off_runs_configured_command() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("powered-off");
        let sink = MockSink::default();
        let position = EncoderPosition::default();
        let mut app = App::from_parts(AppParts {
            button: Some(ButtonTiming::default()),
            power_off_command: touch(&marker),
            ..parts(&sink, &position)
        });

        click(&mut app, ButtonId::Main, Instant::now(), 7_000);

        assert!(wait_for(&marker));
    }

    #[test]
    fn reboot_tier_runs_reboot_command() {
        let dir = tempdir().unwrap();
        let rebooted = dir.path().join("rebooted");
        let powered_off = dir.path().join("powered-off");
        let sink = MockSink::default();
        let position = EncoderPosition::default();
        let timing = ButtonTiming::from_settings(&crate::config::ButtonSettings {
            reboot_command: touch(&rebooted),
            ..Default::default()
        });
        let mut app = App::from_parts(AppParts {
            button: Some(timing),
            reboot_command: touch(&rebooted),
            power_off_command: touch(&powered_off),
            ..parts(&sink, &position)
        });

        click(&mut app, ButtonId::Main, Instant::now(), 2_000);

        assert!(wait_for(&rebooted));
        assert!(!powered_off.exists());
        assert!(!sink.inner.lock().unwrap().switch_muted);
    }

    #[test]
    fn loop_stops_on_shutdown_signal() {
        let sink = MockSink::default();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let (sender_tx, sender_rx) = crossbeam_channel::bounded(1);

        let worker = {
            let sink = sink.clone();
            thread::spawn(move || {
                let position = EncoderPosition::default();
                let mut app = App::from_parts(parts(&sink, &position));
                app.set_shutdown_channel(shutdown_rx);
                sender_tx.send(app.event_sender()).unwrap();
                app.run()
            })
        };

        let events: Sender<InputEvent> = sender_rx.recv().unwrap();
        events.send(InputEvent::Remote(RemoteKey::VolumeUp)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.writes().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        shutdown_tx.send(()).unwrap();
        worker.join().unwrap().unwrap();
        assert_eq!(sink.writes(), vec![60]);
    }
}
