use crate::system::mixer::MixerUnits;

pub fn format_level(value: i64, units: MixerUnits) -> String {
    match units {
        MixerUnits::Raw => value.to_string(),
        MixerUnits::Db => format!("{:.2} dB", value as f64 / 100.0),
    }
}
