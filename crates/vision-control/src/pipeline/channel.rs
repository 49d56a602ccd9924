//! Single-slot, last-write-wins mailbox carrying the visibility set from the
//! control surface to the pipeline's frame loop.
//!
//! Publishing overwrites the slot and never waits on the consumer; taking
//! returns the latest value only when it changed since the previous take.
//! Intermediate values are coalesced, so a slow consumer never accumulates a
//! backlog of superseded toggle states.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tracing::{debug, trace};

use crate::{
    pipeline::{collaborator::Pipeline, heartbeat::PumpHeartbeat},
    visibility::VisibilitySet,
};

#[derive(Debug, Default)]
struct Slot {
    value: VisibilitySet,
    dirty: bool,
    closed: bool,
    generation: u64,
}

/// Cloneable handle to the shared parameter slot.
#[derive(Clone, Debug, Default)]
pub struct ParameterChannel {
    slot: Arc<Mutex<Slot>>,
}

impl ParameterChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel whose latest value is `initial` without anything pending.
    pub fn with_initial(initial: VisibilitySet) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                value: initial,
                ..Slot::default()
            })),
        }
    }

    /// Overwrite the held value.
    ///
    /// Returns `false` when the consumer is gone and the value was discarded.
    pub fn publish(&self, value: VisibilitySet) -> bool {
        let mut slot = self.lock();
        if slot.closed {
            drop(slot);
            metrics::counter!("vision_parameter_publish_dropped_total").increment(1);
            debug!(visible = %value, "pipeline detached; dropping visibility update");
            return false;
        }
        if slot.dirty {
            metrics::counter!("vision_parameter_publish_coalesced_total").increment(1);
        }
        slot.value = value;
        slot.dirty = true;
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        drop(slot);
        metrics::counter!("vision_parameter_publish_total").increment(1);
        trace!(generation, "visibility update published");
        true
    }

    /// Take the latest value if it changed since the last successful take.
    pub fn try_take(&self) -> Option<VisibilitySet> {
        let mut slot = self.lock();
        if slot.closed || !slot.dirty {
            return None;
        }
        slot.dirty = false;
        Some(slot.value.clone())
    }

    /// Last published value, whether or not it has been taken.
    pub fn latest(&self) -> VisibilitySet {
        self.lock().value.clone()
    }

    /// Mark the consumer as gone and discard anything pending.
    ///
    /// Returns `true` when this call closed an open channel.
    pub fn close(&self) -> bool {
        let mut slot = self.lock();
        let was_open = !slot.closed;
        slot.closed = true;
        slot.dirty = false;
        was_open
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Accept updates again for a new consumer, re-delivering the last value.
    pub(crate) fn reopen(&self) {
        let mut slot = self.lock();
        slot.closed = false;
        slot.dirty = slot.generation > 0;
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot holds plain data; a panic mid-update cannot leave it torn.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pipeline-side view of the parameter channel.
///
/// Handed to [`Pipeline::run`]; every poll records a heartbeat.
#[derive(Debug)]
pub struct ParameterPump {
    channel: ParameterChannel,
    stop: Arc<AtomicBool>,
    heartbeat: Arc<PumpHeartbeat>,
    applied: AtomicU64,
}

impl ParameterPump {
    /// Pump not attached to a supervisor, for driving a pipeline directly.
    pub fn new(channel: ParameterChannel) -> Self {
        Self::attached(
            channel,
            Arc::new(AtomicBool::new(false)),
            Arc::new(PumpHeartbeat::new()),
        )
    }

    pub(crate) fn attached(
        channel: ParameterChannel,
        stop: Arc<AtomicBool>,
        heartbeat: Arc<PumpHeartbeat>,
    ) -> Self {
        Self {
            channel,
            stop,
            heartbeat,
            applied: AtomicU64::new(0),
        }
    }

    /// Poll for a pending update without forwarding it.
    pub fn next_update(&self) -> Option<VisibilitySet> {
        self.heartbeat.beat();
        let update = self.channel.try_take();
        if update.is_some() {
            self.applied.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("vision_parameter_applied_total").increment(1);
        }
        update
    }

    /// Forward a pending update into the pipeline's parameter setter.
    ///
    /// Returns whether an update was applied.
    pub fn apply<P: Pipeline + ?Sized>(&self, pipeline: &mut P) -> bool {
        match self.next_update() {
            Some(visible) => {
                debug!(visible = %visible, "applying overlay visibility");
                pipeline.set_parameters(visible);
                true
            }
            None => false,
        }
    }

    /// Whether the control surface asked the pipeline to stop.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Updates taken from the channel during this run.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn heartbeat(&self) -> &PumpHeartbeat {
        &self.heartbeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::OverlayLabel;

    #[test]
    fn test_take_without_publish_is_empty() {
        let channel = ParameterChannel::new();
        assert_eq!(channel.try_take(), None);
    }

    #[test]
    fn test_publish_then_take_once() {
        let channel = ParameterChannel::new();
        assert!(channel.publish(VisibilitySet::all()));
        assert_eq!(channel.try_take(), Some(VisibilitySet::all()));
        assert_eq!(channel.try_take(), None);
        assert_eq!(channel.latest(), VisibilitySet::all());
    }

    #[test]
    fn test_rapid_publishes_coalesce_to_last() {
        let channel = ParameterChannel::new();
        channel.publish(VisibilitySet::from([OverlayLabel::Boxes]));
        channel.publish(VisibilitySet::from([OverlayLabel::BodyPose]));
        channel.publish(VisibilitySet::all());
        assert_eq!(channel.try_take(), Some(VisibilitySet::all()));
        assert_eq!(channel.try_take(), None);
        assert_eq!(channel.try_take(), None);
    }

    #[test]
    fn test_republishing_same_value_is_delivered() {
        let channel = ParameterChannel::new();
        channel.publish(VisibilitySet::empty());
        assert_eq!(channel.try_take(), Some(VisibilitySet::empty()));
        channel.publish(VisibilitySet::empty());
        assert_eq!(channel.try_take(), Some(VisibilitySet::empty()));
    }

    #[test]
    fn test_closed_channel_rejects_and_yields_nothing() {
        let channel = ParameterChannel::new();
        channel.publish(VisibilitySet::all());
        assert!(channel.close());
        assert!(!channel.close());
        assert!(channel.is_closed());
        assert_eq!(channel.try_take(), None);
        assert!(!channel.publish(VisibilitySet::empty()));
        assert_eq!(channel.try_take(), None);
    }

    #[test]
    fn test_reopen_redelivers_last_published_value() {
        let channel = ParameterChannel::new();
        channel.publish(VisibilitySet::from([OverlayLabel::Boxes]));
        channel.close();
        channel.reopen();
        assert_eq!(
            channel.try_take(),
            Some(VisibilitySet::from([OverlayLabel::Boxes]))
        );
    }

    #[test]
    fn test_reopen_without_history_has_nothing_pending() {
        let channel = ParameterChannel::with_initial(VisibilitySet::all());
        channel.close();
        channel.reopen();
        assert_eq!(channel.try_take(), None);
        assert_eq!(channel.latest(), VisibilitySet::all());
    }

    #[test]
    fn test_concurrent_publishers_leave_one_value() {
        let channel = ParameterChannel::new();
        let handles: Vec<_> = (0..4)
            .map(|idx| {
                let channel = channel.clone();
                std::thread::spawn(move || {
                    for round in 0..250 {
                        let mut set = VisibilitySet::empty();
                        set.set(OverlayLabel::Boxes, (idx + round) % 2 == 0);
                        channel.publish(set);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(channel.try_take().is_some());
        assert_eq!(channel.try_take(), None);
    }

    struct Recorder(Vec<VisibilitySet>);

    impl Pipeline for Recorder {
        fn configure(
            &mut self,
            _source: &crate::pipeline::collaborator::ConfigSource,
        ) -> Result<(), crate::error::ConfigError> {
            Ok(())
        }

        fn run(&mut self, pump: &ParameterPump) {
            pump.apply(self);
        }

        fn set_parameters(&mut self, visible: VisibilitySet) {
            self.0.push(visible);
        }
    }

    #[test]
    fn test_pump_forwards_into_setter_and_beats() {
        let channel = ParameterChannel::new();
        let pump = ParameterPump::new(channel.clone());
        let mut recorder = Recorder(Vec::new());

        recorder.run(&pump);
        assert!(recorder.0.is_empty());

        channel.publish(VisibilitySet::from([OverlayLabel::BodyPose]));
        recorder.run(&pump);
        recorder.run(&pump);

        assert_eq!(
            recorder.0,
            vec![VisibilitySet::from([OverlayLabel::BodyPose])]
        );
        assert_eq!(pump.applied(), 1);
        assert_eq!(pump.heartbeat().beats(), 3);
        assert!(!pump.stop_requested());
    }
}
