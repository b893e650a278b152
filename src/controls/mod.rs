mod button;
mod setup_mix;
mod volume;

pub use button::{ButtonAction, ButtonController, ButtonTiming};
pub use setup_mix::apply_presets;
pub use volume::{Direction, VolumeController, VolumePolicy};
