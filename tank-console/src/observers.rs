//! Fan-out of console events to connected browser observers.

use std::sync::Mutex;

use tank_protocol::ConsoleEvent;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Observer list with best-effort delivery. A failed send means the
/// observer's receiver was dropped; failed observers are pruned after the
/// fan-out pass completes, and never affect the others.
#[derive(Default)]
pub struct ObserverHub {
    observers: Mutex<Vec<UnboundedSender<ConsoleEvent>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<ConsoleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .push(tx);
        rx
    }

    pub fn broadcast(&self, event: ConsoleEvent) {
        let mut observers = self.observers.lock().expect("observer list lock poisoned");
        let mut hung_up = Vec::new();
        for (index, observer) in observers.iter().enumerate() {
            if observer.send(event.clone()).is_err() {
                hung_up.push(index);
            }
        }
        for index in hung_up.into_iter().rev() {
            observers.swap_remove(index);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tank_protocol::MovementStatus;

    fn status_event() -> ConsoleEvent {
        ConsoleEvent::Status {
            status: MovementStatus::Moving,
        }
    }

    #[test]
    fn broadcast_reaches_every_observer() {
        let hub = ObserverHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.broadcast(status_event());

        assert_eq!(first.try_recv().unwrap(), status_event());
        assert_eq!(second.try_recv().unwrap(), status_event());
    }

    #[test]
    fn hung_up_observers_are_pruned_without_disturbing_others() {
        let hub = ObserverHub::new();
        let first = hub.subscribe();
        let mut second = hub.subscribe();
        drop(first);

        hub.broadcast(status_event());

        assert_eq!(second.try_recv().unwrap(), status_event());
        assert_eq!(hub.observer_count(), 1);
    }

    #[test]
    fn broadcast_without_observers_is_a_no_op() {
        let hub = ObserverHub::new();
        hub.broadcast(status_event());
        assert_eq!(hub.observer_count(), 0);
    }
}
