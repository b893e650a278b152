use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use rppal::gpio::{Event, Gpio, InputPin, OutputPin, Trigger};
use tracing::{debug, info, trace, warn};

use super::quadrature::EdgeOutcome;
use super::{
    AmpControl, ButtonId, GpioConfig, InputEvent, LedControl, PinLevels, QuadratureDecoder,
};

#[derive(Clone)]
pub struct HardwareHandle {
    command_tx: Sender<HardwareCommand>,
}

enum HardwareCommand {
    SetAmpMuted(bool),
    ToggleLed(usize),
}

impl AmpControl for HardwareHandle {
    fn set_amp_muted(&self, muted: bool) -> Result<()> {
        self.command_tx
            .send(HardwareCommand::SetAmpMuted(muted))
            .map_err(|err| anyhow!("gpio command channel closed: {err}"))
    }
}

impl LedControl for HardwareHandle {
    fn toggle_led(&self, index: usize) -> Result<()> {
        self.command_tx
            .send(HardwareCommand::ToggleLed(index))
            .map_err(|err| anyhow!("gpio command channel closed: {err}"))
    }
}

#[derive(Debug, Default)]
struct LineLevels {
    a: AtomicBool,
    b: AtomicBool,
}

impl LineLevels {
    fn snapshot(&self) -> PinLevels {
        PinLevels::new(self.a.load(Ordering::Relaxed), self.b.load(Ordering::Relaxed))
    }
}

pub fn start(
    config: &GpioConfig,
    decoder: Arc<QuadratureDecoder>,
    events: Sender<InputEvent>,
) -> Result<HardwareHandle> {
    let gpio = Gpio::new().context("failed to open GPIO; check /dev/gpiomem permissions")?;

    let mut inputs = Vec::new();
    if let Some((pin_a, pin_b)) = config.encoder {
        inputs.extend(attach_encoder(&gpio, pin_a, pin_b, decoder)?);
        info!(pin_a, pin_b, "rotary encoder attached");
    }
    if let Some(pin) = config.button {
        inputs.push(attach_button(
            &gpio,
            pin,
            ButtonId::Main,
            config.button_debounce,
            events.clone(),
        )?);
        info!(pin, "push button attached");
    }

    let mut leds = Vec::with_capacity(config.panel.len());
    for (index, &(pin, led)) in config.panel.iter().enumerate() {
        inputs.push(attach_button(
            &gpio,
            pin,
            ButtonId::Panel(index),
            config.button_debounce,
            events.clone(),
        )?);
        let led = match led {
            Some(led_pin) => Some(
                gpio.get(led_pin)
                    .with_context(|| format!("failed to claim LED GPIO {led_pin}"))?
                    .into_output_low(),
            ),
            None => None,
        };
        info!(index, pin, led_pin = ?led.as_ref().map(OutputPin::pin), "panel button attached");
        leds.push(led);
    }

    let amp = match config.amp_mute {
        Some(pin) => {
            let output = gpio
                .get(pin)
                .with_context(|| format!("failed to claim amplifier mute GPIO {pin}"))?
                .into_output_high();
            info!(pin, "amplifier mute line attached");
            Some(output)
        }
        None => None,
    };

    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("gpio-backend".into())
        .spawn(move || run_backend(inputs, amp, leds, command_rx))
        .context("failed to spawn gpio backend")?;

    Ok(HardwareHandle { command_tx })
}

fn attach_encoder(
    gpio: &Gpio,
    pin_a: u8,
    pin_b: u8,
    decoder: Arc<QuadratureDecoder>,
) -> Result<[InputPin; 2]> {
    // Encoder common is grounded, so both lines need the pull-ups.
    let mut line_a = gpio
        .get(pin_a)
        .with_context(|| format!("failed to claim encoder GPIO {pin_a}"))?
        .into_input_pullup();
    let mut line_b = gpio
        .get(pin_b)
        .with_context(|| format!("failed to claim encoder GPIO {pin_b}"))?
        .into_input_pullup();

    let levels = Arc::new(LineLevels {
        a: AtomicBool::new(line_a.is_high()),
        b: AtomicBool::new(line_b.is_high()),
    });
    decoder.seed(levels.snapshot());
    debug!(
        encoded = decoder.last_encoded(),
        position = decoder.position().get(),
        "encoder seeded"
    );

    {
        let levels = Arc::clone(&levels);
        let decoder = Arc::clone(&decoder);
        line_a
            .set_async_interrupt(Trigger::Both, None, move |event: Event| {
                levels
                    .a
                    .store(matches!(event.trigger, Trigger::RisingEdge), Ordering::Relaxed);
                feed(&decoder, &levels);
            })
            .with_context(|| format!("failed to watch encoder GPIO {pin_a}"))?;
    }
    line_b
        .set_async_interrupt(Trigger::Both, None, move |event: Event| {
            levels
                .b
                .store(matches!(event.trigger, Trigger::RisingEdge), Ordering::Relaxed);
            feed(&decoder, &levels);
        })
        .with_context(|| format!("failed to watch encoder GPIO {pin_b}"))?;

    Ok([line_a, line_b])
}

fn feed(decoder: &QuadratureDecoder, levels: &LineLevels) {
    match decoder.on_edge(levels.snapshot()) {
        EdgeOutcome::Stepped(step) => trace!(?step, "encoder step"),
        EdgeOutcome::Glitch => trace!("encoder glitch"),
        EdgeOutcome::Dropped => trace!("overlapping encoder edge dropped"),
    }
}

fn attach_button(
    gpio: &Gpio,
    pin: u8,
    id: ButtonId,
    debounce: Duration,
    events: Sender<InputEvent>,
) -> Result<InputPin> {
    let mut line = gpio
        .get(pin)
        .with_context(|| format!("failed to claim button GPIO {pin}"))?
        .into_input_pullup();
    let debounce = (!debounce.is_zero()).then_some(debounce);

    // Active low: the switch pulls the line to ground.
    line.set_async_interrupt(Trigger::Both, debounce, move |event: Event| {
        let input = match event.trigger {
            Trigger::FallingEdge => InputEvent::ButtonPressed(id),
            _ => InputEvent::ButtonReleased(id),
        };
        events.send(input).ok();
    })
    .with_context(|| format!("failed to watch button GPIO {pin}"))?;
    Ok(line)
}

fn run_backend(
    inputs: Vec<InputPin>,
    mut amp: Option<OutputPin>,
    mut leds: Vec<Option<OutputPin>>,
    command_rx: Receiver<HardwareCommand>,
) {
    for command in command_rx.iter() {
        match command {
            HardwareCommand::SetAmpMuted(muted) => match amp.as_mut() {
                Some(pin) if muted => pin.set_low(),
                Some(pin) => pin.set_high(),
                None => warn!(muted, "no amplifier mute line configured"),
            },
            HardwareCommand::ToggleLed(index) => {
                match leds.get_mut(index).and_then(Option::as_mut) {
                    Some(pin) => {
                        pin.toggle();
                        debug!(index, lit = pin.is_set_high(), "panel LED toggled");
                    }
                    None => debug!(index, "panel button has no LED"),
                }
            }
        }
    }

    debug!(lines = inputs.len(), "gpio backend stopped; releasing lines");
    drop(inputs);
    drop(leds);
}

impl std::fmt::Debug for HardwareHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareHandle").finish_non_exhaustive()
    }
}
