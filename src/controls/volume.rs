use tracing::{debug, info, warn};

use crate::config::MixerSettings;
use crate::system::mixer::{MixerUnits, SinkError, VolumeRange, VolumeSink};
use crate::util::format_level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumePolicy {
    pub step: i64,
    pub units: MixerUnits,
    /// Written when a decrease drops below the usable range. Defaults to the
    /// range floor.
    pub muted_sentinel: Option<i64>,
}

impl VolumePolicy {
    pub fn from_settings(settings: &MixerSettings) -> Self {
        Self {
            step: settings.step(),
            units: settings.units,
            muted_sentinel: settings.muted_sentinel,
        }
    }

    fn sentinel(&self, range: &VolumeRange) -> i64 {
        self.muted_sentinel.unwrap_or(range.min)
    }

    /// Level to write for one step in `direction`, or `None` when the sink
    /// should be left alone.
    ///
    /// Raising from mute starts at the first usable level; lowering past it
    /// jumps straight to the muted sentinel instead of stopping at the floor.
    pub fn next_level(
        &self,
        range: &VolumeRange,
        current: i64,
        direction: Direction,
    ) -> Option<i64> {
        match direction {
            Direction::Up => {
                let base = current.max(range.usable_min);
                Some(base.saturating_add(self.step).min(range.max))
            }
            Direction::Down => {
                if range.is_muted(current) {
                    return None;
                }
                let lowered = current.saturating_sub(self.step);
                if lowered < range.usable_min {
                    Some(self.sentinel(range))
                } else {
                    Some(lowered)
                }
            }
        }
    }
}

pub struct VolumeController<S>
where
    S: VolumeSink,
{
    sink: S,
    policy: VolumePolicy,
    range: Option<VolumeRange>,
    last_position: i64,
}

impl<S> VolumeController<S>
where
    S: VolumeSink,
{
    pub fn new(sink: S, policy: VolumePolicy, position: i64) -> Self {
        let range = match sink.range() {
            Ok(range) => {
                info!(
                    mixer = %sink.describe(),
                    min = %format_level(range.min, policy.units),
                    usable_min = %format_level(range.usable_min, policy.units),
                    max = %format_level(range.max, policy.units),
                    "volume range"
                );
                Some(range)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    mixer = %sink.describe(),
                    "failed to query volume range; retrying on first change"
                );
                None
            }
        };

        Self {
            sink,
            policy,
            range,
            last_position: position,
        }
    }

    /// Applies one step if the encoder moved since the last poll. An idle
    /// poll does not touch the sink.
    pub fn poll(&mut self, position: i64) -> Result<Option<i64>, SinkError> {
        if position == self.last_position {
            return Ok(None);
        }

        let direction = if position > self.last_position {
            Direction::Up
        } else {
            Direction::Down
        };
        debug!(position, last = self.last_position, ?direction, "encoder moved");
        self.last_position = position;
        self.step(direction)
    }

    pub fn step(&mut self, direction: Direction) -> Result<Option<i64>, SinkError> {
        let range = self.range()?;
        // Re-read every time: other programs may have changed the level.
        let current = self.sink.get()?;

        let Some(target) = self.policy.next_level(&range, current, direction) else {
            debug!(current, "volume already muted");
            return Ok(None);
        };

        self.sink.set(target)?;
        debug!(
            ?direction,
            from = %format_level(current, self.policy.units),
            to = %format_level(target, self.policy.units),
            "volume set"
        );
        Ok(Some(target))
    }

    pub fn toggle_mute(&mut self) -> Result<bool, SinkError> {
        let muted = self.sink.toggle_mute()?;
        info!(muted, mixer = %self.sink.describe(), "playback switch toggled");
        Ok(muted)
    }

    pub fn last_position(&self) -> i64 {
        self.last_position
    }

    fn range(&mut self) -> Result<VolumeRange, SinkError> {
        if let Some(range) = self.range {
            return Ok(range);
        }
        let range = self.sink.range()?;
        self.range = Some(range);
        Ok(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mixer::tests::{MockSink, MockSinkState};

    use proptest::prelude::*;

    fn policy(step: i64, muted_sentinel: Option<i64>) -> VolumePolicy {
        VolumePolicy {
            step,
            units: MixerUnits::Raw,
            muted_sentinel,
        }
    }

    fn controller(volume: i64) -> (VolumeController<MockSink>, MockSink) {
        let sink = MockSink::with_state(MockSinkState {
            volume,
            ..Default::default()
        });
        let controller = VolumeController::new(sink.clone(), policy(10, Some(-1)), 0);
        (controller, sink)
    }

    #[test]
    fn idle_poll_leaves_sink_untouched() {
        let (mut controller, sink) = controller(50);
        assert_eq!(controller.poll(0).unwrap(), None);
        assert_eq!(controller.poll(0).unwrap(), None);
        assert_eq!(sink.reads(), 0);
        assert!(sink.writes().is_empty());
    }

    #[test]
    fn raising_from_mute_starts_at_usable_minimum() {
        let (mut controller, sink) = controller(-1);
        assert_eq!(controller.poll(1).unwrap(), Some(11));
        assert_eq!(sink.writes(), vec![11]);
    }

    #[test]
    fn raising_from_floor_counts_as_unmute() {
        let (mut controller, sink) = controller(0);
        assert_eq!(controller.step(Direction::Up).unwrap(), Some(11));
        assert_eq!(sink.volume(), 11);
    }

    #[test]
    fn lowering_from_usable_minimum_mutes() {
        let (mut controller, sink) = controller(1);
        assert_eq!(controller.poll(-1).unwrap(), Some(-1));
        assert_eq!(sink.writes(), vec![-1]);
    }

    #[test]
    fn lowering_while_muted_is_a_no_op() {
        let (mut controller, sink) = controller(-1);
        assert_eq!(controller.step(Direction::Down).unwrap(), None);
        assert!(sink.writes().is_empty());
        assert_eq!(sink.reads(), 1);
    }

    #[test]
    fn sentinel_defaults_to_range_floor() {
        let sink = MockSink::with_state(MockSinkState {
            range: VolumeRange::new(0, 207),
            volume: 5,
            ..Default::default()
        });
        let mut controller = VolumeController::new(sink.clone(), policy(10, None), 0);
        assert_eq!(controller.step(Direction::Down).unwrap(), Some(0));
    }

    #[test]
    fn one_step_per_poll_regardless_of_distance() {
        let (mut controller, sink) = controller(50);
        assert_eq!(controller.poll(4).unwrap(), Some(60));
        assert_eq!(controller.poll(-12).unwrap(), Some(50));
        assert_eq!(controller.last_position(), -12);
        assert_eq!(sink.writes(), vec![60, 50]);
    }

    #[test]
    fn decibel_policy_uses_sink_reported_usable_minimum() {
        let sink = MockSink::with_state(MockSinkState {
            range: VolumeRange::with_usable_min(-10350, 0, -10300),
            volume: -10250,
            ..Default::default()
        });
        let policy = VolumePolicy {
            step: 100,
            units: MixerUnits::Db,
            muted_sentinel: Some(-99999),
        };
        let mut controller = VolumeController::new(sink.clone(), policy, 0);

        assert_eq!(controller.step(Direction::Down).unwrap(), Some(-99999));
        assert_eq!(controller.step(Direction::Up).unwrap(), Some(-10200));
    }

    #[test]
    fn end_to_end_scenario() {
        let (mut controller, sink) = controller(50);
        let mut position = 0;

        position += 1;
        assert_eq!(controller.poll(position).unwrap(), Some(60));

        for _ in 0..5 {
            position += 1;
            controller.poll(position).unwrap();
        }
        assert_eq!(sink.writes().last(), Some(&100));
        assert_eq!(sink.volume(), 100);

        let mut results = Vec::new();
        for _ in 0..11 {
            position -= 1;
            results.push(controller.poll(position).unwrap());
        }
        let expected: Vec<Option<i64>> = (1..=9)
            .map(|n| Some(100 - 10 * n))
            .chain([Some(-1), None])
            .collect();
        assert_eq!(results, expected);
        assert_eq!(sink.volume(), -1);
    }

    #[test]
    fn sink_errors_skip_the_step_but_track_position() {
        let (mut controller, sink) = controller(50);
        sink.inner.lock().unwrap().fail_reads = true;

        assert!(matches!(controller.poll(1), Err(SinkError::Unavailable(_))));
        assert_eq!(controller.last_position(), 1);
        assert_eq!(controller.poll(1).unwrap(), None);

        sink.inner.lock().unwrap().fail_reads = false;
        assert_eq!(controller.poll(2).unwrap(), Some(60));
    }

    #[test]
    fn range_is_requeried_after_startup_failure() {
        let sink = MockSink::with_state(MockSinkState {
            fail_range: true,
            ..Default::default()
        });
        let mut controller = VolumeController::new(sink.clone(), policy(10, Some(-1)), 0);
        assert!(controller.step(Direction::Up).is_err());

        sink.inner.lock().unwrap().fail_range = false;
        assert_eq!(controller.step(Direction::Up).unwrap(), Some(60));
    }

    #[test]
    fn toggle_mute_flips_switch() {
        let (mut controller, sink) = controller(50);
        assert!(controller.toggle_mute().unwrap());
        assert!(!controller.toggle_mute().unwrap());
        assert!(sink.writes().is_empty());
    }

    proptest! {
        #[test]
        fn raising_never_exceeds_max(
            min in -200i64..0,
            span in 2i64..400,
            current in -300i64..500,
            step in 1i64..150,
        ) {
            let range = VolumeRange::new(min, min + span);
            let level = policy(step, Some(min - 1)).next_level(&range, current, Direction::Up);
            let level = level.expect("raising always writes");
            prop_assert!(level <= range.max);
            prop_assert!(level >= range.usable_min);
        }

        #[test]
        fn lowering_never_lands_between_sentinel_and_usable_minimum(
            min in -200i64..0,
            span in 2i64..400,
            current in -300i64..500,
            step in 1i64..150,
        ) {
            let range = VolumeRange::new(min, min + span);
            let sentinel = min - 1;
            match policy(step, Some(sentinel)).next_level(&range, current, Direction::Down) {
                None => {
                    prop_assert!(current < range.usable_min);
                }
                Some(level) => {
                    prop_assert!(level == sentinel || level >= range.usable_min);
                }
            }
        }
    }
}
