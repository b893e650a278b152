#[cfg(feature = "hardware")]
pub mod alsa_mixer;
pub mod amixer;
pub mod availability;
pub mod lirc;
pub mod mixer;
