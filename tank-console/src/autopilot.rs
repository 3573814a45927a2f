//! Auto-movement controller.
//!
//! Watches each frame's detections against the operator's target set and,
//! on a hit, runs one fixed forward-then-stop maneuver. Maneuvers never
//! overlap: the first caller to observe the idle state wins it with a
//! compare-and-set and every later trigger is a no-op until the timed
//! window elapses.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde_json::Map;
use tank_protocol::{ConsoleEvent, Detection, MovementStatus, StatusResponse};
use tracing::{info, warn};

use crate::channel::CommandChannel;
use crate::observers::ObserverHub;

pub const MANEUVER_DURATION: Duration = Duration::from_secs(5);
pub const DEFAULT_FORWARD_SPEED: f64 = 50.0;

pub struct AutoPilot<C> {
    channel: C,
    hub: Arc<ObserverHub>,
    enabled: AtomicBool,
    moving: AtomicBool,
    targets: Mutex<HashSet<String>>,
    maneuver: Duration,
    forward_speed: f64,
}

impl<C: CommandChannel + 'static> AutoPilot<C> {
    pub fn new(channel: C, hub: Arc<ObserverHub>, forward_speed: f64) -> Self {
        Self {
            channel,
            hub,
            enabled: AtomicBool::new(false),
            moving: AtomicBool::new(false),
            targets: Mutex::new(HashSet::new()),
            maneuver: MANEUVER_DURATION,
            forward_speed,
        }
    }

    /// Called once per processed frame with that frame's detections.
    ///
    /// Starts a maneuver when auto-movement is enabled, the lowercased
    /// detection classes intersect the target set, and no maneuver is in
    /// flight. Everything else is a silent no-op; suppressed triggers
    /// during a maneuver are the intended debounce.
    pub fn on_new_detections(self: &Arc<Self>, detections: &[Detection]) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let triggered = {
            let targets = self.targets.lock().expect("target set lock poisoned");
            !targets.is_empty()
                && detections
                    .iter()
                    .any(|d| targets.contains(&d.class.to_lowercase()))
        };
        if !triggered {
            return;
        }
        // Whole critical section: whoever observes idle flips to moving in
        // the same atomic step, before any suspension point.
        if self
            .moving
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let pilot = Arc::clone(self);
        tokio::spawn(async move { pilot.run_maneuver().await });
    }

    async fn run_maneuver(&self) {
        // Restores idle on every exit path, unwind included.
        struct IdleOnExit<'a>(&'a AtomicBool);
        impl Drop for IdleOnExit<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::SeqCst);
            }
        }
        let idle_on_exit = IdleOnExit(&self.moving);

        self.hub.broadcast(ConsoleEvent::Status {
            status: MovementStatus::Moving,
        });

        let mut params = Map::new();
        params.insert("speed".to_string(), self.forward_speed.into());
        match self.channel.send("forward", params).await {
            Ok(ack) if ack.is_ok() => info!("maneuver started"),
            Ok(ack) => warn!(detail = ?ack.detail, "vehicle rejected forward, running the window anyway"),
            Err(e) => warn!("forward command failed, running the window anyway: {e}"),
        }

        // The window is unconditional. There is no wheel feedback to
        // confirm the start, so command outcomes never change the timing.
        tokio::time::sleep(self.maneuver).await;

        match self.channel.send("stop", Map::new()).await {
            Ok(ack) if ack.is_ok() => info!("maneuver finished"),
            Ok(ack) => warn!(detail = ?ack.detail, "vehicle rejected stop"),
            Err(e) => warn!("stop command failed: {e}"),
        }

        drop(idle_on_exit);
        self.hub.broadcast(ConsoleEvent::Status {
            status: MovementStatus::Stopped,
        });
    }

    /// Replace the target set. Entries are split on commas, trimmed,
    /// lowercased and deduplicated; whitespace-only input leaves the set
    /// empty, which makes auto-movement inert.
    pub fn set_target_objects(&self, names: &[String]) {
        let parsed: HashSet<String> = names
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_lowercase)
            .collect();
        info!(targets = ?parsed, "target objects updated");
        *self.targets.lock().expect("target set lock poisoned") = parsed;
    }

    /// Toggle auto-movement. Never touches an in-flight maneuver.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "auto movement toggled");
    }

    pub fn status(&self) -> StatusResponse {
        let mut target_objects: Vec<String> = self
            .targets
            .lock()
            .expect("target set lock poisoned")
            .iter()
            .cloned()
            .collect();
        target_objects.sort();
        StatusResponse {
            auto_movement_enabled: self.enabled.load(Ordering::SeqCst),
            target_objects,
            movement_active: self.moving.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use async_trait::async_trait;
    use serde_json::Value;
    use tank_protocol::CommandAck;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
        reject_forward: bool,
        fail_transport: bool,
    }

    impl RecordingChannel {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandChannel for RecordingChannel {
        async fn send(
            &self,
            command: &str,
            _params: Map<String, Value>,
        ) -> Result<CommandAck, ChannelError> {
            self.sent.lock().unwrap().push(command.to_string());
            if self.fail_transport {
                return Err(ChannelError::new("link down"));
            }
            if self.reject_forward && command == "forward" {
                return Ok(CommandAck::error("motor fault"));
            }
            Ok(CommandAck::ok())
        }
    }

    struct Fixture {
        pilot: Arc<AutoPilot<Arc<RecordingChannel>>>,
        channel: Arc<RecordingChannel>,
        events: UnboundedReceiver<ConsoleEvent>,
    }

    fn fixture_with(channel: RecordingChannel) -> Fixture {
        let channel = Arc::new(channel);
        let hub = Arc::new(ObserverHub::new());
        let events = hub.subscribe();
        let pilot = Arc::new(AutoPilot::new(channel.clone(), hub, DEFAULT_FORWARD_SPEED));
        Fixture {
            pilot,
            channel,
            events,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingChannel::default())
    }

    fn person() -> Detection {
        Detection {
            class: "person".to_string(),
            confidence: 0.9,
            bbox: [0, 0, 10, 10],
        }
    }

    /// Let spawned tasks run up to their next suspension point without
    /// parking the runtime (parking would auto-advance the paused clock).
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(events: &mut UnboundedReceiver<ConsoleEvent>) -> Vec<ConsoleEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn full_maneuver_runs_forward_then_stop_after_five_seconds() {
        let mut fx = fixture();
        fx.pilot.set_target_objects(&["person".to_string()]);
        fx.pilot.set_enabled(true);

        fx.pilot.on_new_detections(&[person()]);
        settle().await;

        assert_eq!(fx.channel.sent(), vec!["forward"]);
        assert!(fx.pilot.status().movement_active);

        tokio::time::advance(Duration::from_millis(4_999)).await;
        settle().await;
        assert_eq!(fx.channel.sent(), vec!["forward"], "stop must wait for the full window");
        assert!(fx.pilot.status().movement_active);

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(fx.channel.sent(), vec!["forward", "stop"]);
        assert!(!fx.pilot.status().movement_active);

        let statuses = drain(&mut fx.events);
        assert_eq!(
            statuses,
            vec![
                ConsoleEvent::Status {
                    status: MovementStatus::Moving
                },
                ConsoleEvent::Status {
                    status: MovementStatus::Stopped
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn detections_during_a_maneuver_are_debounced() {
        let mut fx = fixture();
        fx.pilot.set_target_objects(&["person".to_string()]);
        fx.pilot.set_enabled(true);

        fx.pilot.on_new_detections(&[person()]);
        settle().await;

        tokio::time::advance(Duration::from_secs(1)).await;
        fx.pilot.on_new_detections(&[person()]);
        settle().await;

        assert_eq!(fx.channel.sent(), vec!["forward"], "second batch must not start a maneuver");
        assert!(fx.pilot.status().movement_active);

        tokio::time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(fx.channel.sent(), vec!["forward", "stop"]);
        assert_eq!(drain(&mut fx.events).len(), 2, "exactly one moving/stopped pair");
    }

    #[tokio::test(start_paused = true)]
    async fn near_simultaneous_batches_start_exactly_one_maneuver() {
        let fx = fixture();
        fx.pilot.set_target_objects(&["person".to_string()]);
        fx.pilot.set_enabled(true);

        // Both calls observe the controller before the spawned maneuver has
        // run at all; only the compare-and-set winner may proceed.
        fx.pilot.on_new_detections(&[person()]);
        fx.pilot.on_new_detections(&[person()]);
        settle().await;

        assert_eq!(fx.channel.sent(), vec!["forward"]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_trigger_without_target_intersection() {
        let fx = fixture();
        fx.pilot.set_target_objects(&["dog".to_string()]);
        fx.pilot.set_enabled(true);

        fx.pilot.on_new_detections(&[person()]);
        settle().await;

        assert!(fx.channel.sent().is_empty());
        assert!(!fx.pilot.status().movement_active);
    }

    #[tokio::test(start_paused = true)]
    async fn no_trigger_while_disabled() {
        let fx = fixture();
        fx.pilot.set_target_objects(&["person".to_string()]);

        fx.pilot.on_new_detections(&[person()]);
        settle().await;

        assert!(fx.channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_set_is_inert_even_when_enabled() {
        let fx = fixture();
        fx.pilot.set_target_objects(&["   ".to_string()]);
        fx.pilot.set_enabled(true);
        assert!(fx.pilot.status().target_objects.is_empty());

        fx.pilot.on_new_detections(&[person()]);
        settle().await;

        assert!(fx.channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn detection_classes_match_case_insensitively() {
        let fx = fixture();
        fx.pilot.set_target_objects(&["person".to_string()]);
        fx.pilot.set_enabled(true);

        let detection = Detection {
            class: "Person".to_string(),
            ..person()
        };
        fx.pilot.on_new_detections(&[detection]);
        settle().await;

        assert_eq!(fx.channel.sent(), vec!["forward"]);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_during_maneuver_does_not_shorten_the_window() {
        let fx = fixture();
        fx.pilot.set_target_objects(&["person".to_string()]);
        fx.pilot.set_enabled(true);

        fx.pilot.on_new_detections(&[person()]);
        settle().await;

        tokio::time::advance(Duration::from_secs(1)).await;
        fx.pilot.set_enabled(false);
        settle().await;
        assert!(fx.pilot.status().movement_active, "disable must not cancel the maneuver");
        assert_eq!(fx.channel.sent(), vec!["forward"]);

        tokio::time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(fx.channel.sent(), vec!["forward", "stop"]);
        assert!(!fx.pilot.status().movement_active);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_forward_still_runs_the_full_window() {
        let mut fx = fixture_with(RecordingChannel {
            reject_forward: true,
            ..RecordingChannel::default()
        });
        fx.pilot.set_target_objects(&["person".to_string()]);
        fx.pilot.set_enabled(true);

        fx.pilot.on_new_detections(&[person()]);
        settle().await;
        assert_eq!(fx.channel.sent(), vec!["forward"]);
        assert!(fx.pilot.status().movement_active);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(fx.channel.sent(), vec!["forward", "stop"]);
        assert!(!fx.pilot.status().movement_active);
        // The operator still sees the full moving/stopped sequence.
        assert_eq!(drain(&mut fx.events).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_absorbed_and_state_returns_to_idle() {
        let fx = fixture_with(RecordingChannel {
            fail_transport: true,
            ..RecordingChannel::default()
        });
        fx.pilot.set_target_objects(&["person".to_string()]);
        fx.pilot.set_enabled(true);

        fx.pilot.on_new_detections(&[person()]);
        settle().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(fx.channel.sent(), vec!["forward", "stop"]);
        assert!(!fx.pilot.status().movement_active);

        // The controller is usable again after the failed maneuver.
        fx.pilot.on_new_detections(&[person()]);
        settle().await;
        assert_eq!(fx.channel.sent(), vec!["forward", "stop", "forward"]);
    }

    #[tokio::test(start_paused = true)]
    async fn target_normalization_trims_lowercases_and_drops_empties() {
        let fx = fixture();
        fx.pilot
            .set_target_objects(&["Car, DOG ,  ".to_string()]);

        assert_eq!(
            fx.pilot.status().target_objects,
            vec!["car".to_string(), "dog".to_string()]
        );

        fx.pilot.set_target_objects(&[String::new()]);
        assert!(fx.pilot.status().target_objects.is_empty());
    }
}
