//! Fire-and-forget fan-out of channel messages to subscribers.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info};

use crate::domain::Reading;
use crate::messages::{ChannelMessage, ConnectMessage};

/// Default per-subscriber queue bound.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Outbound capability used by the streaming loop.
pub trait Publisher {
    /// Deliver to every current subscriber. No acknowledgement, no retry.
    fn broadcast(&self, message: &ChannelMessage);

    /// Record the most recent window point for greeting new subscribers.
    fn update_snapshot(&self, _latest: Option<&Reading>) {}

    /// Release all subscribers.
    fn close(&self) {}
}

struct Subscriber {
    id: u64,
    tx: Sender<ChannelMessage>,
}

#[derive(Default)]
struct HubState {
    subscribers: Vec<Subscriber>,
    snapshot: Option<Reading>,
    next_id: u64,
    closed: bool,
}

/// Cloneable handle; clones share the same subscriber set.
#[derive(Clone)]
pub struct BroadcastHub {
    state: Arc<Mutex<HubState>>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a subscriber. If a window snapshot exists it is queued first
    /// as a connect message. After `close` the receiver is already
    /// disconnected.
    pub fn subscribe(&self) -> Receiver<ChannelMessage> {
        let (tx, rx) = bounded(self.capacity);
        let mut state = self.lock();
        if state.closed {
            return rx;
        }
        if let Some(latest) = state.snapshot {
            let greeting = ConnectMessage::snapshot(latest, Utc::now().naive_utc());
            let _ = tx.try_send(ChannelMessage::Connect(greeting));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(Subscriber { id, tx });
        info!("client {} connected", id);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl Publisher for BroadcastHub {
    fn broadcast(&self, message: &ChannelMessage) {
        let mut state = self.lock();
        state.subscribers.retain(|sub| match sub.tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("client {} is lagging, message dropped", sub.id);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                info!("client {} disconnected", sub.id);
                false
            }
        });
    }

    fn update_snapshot(&self, latest: Option<&Reading>) {
        self.lock().snapshot = latest.copied();
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertSet, FeatureVector, TickMetadata, TickResult};
    use crate::messages::TickMessage;
    use chrono::NaiveDate;

    fn reading() -> Reading {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        Reading::new(ts, FeatureVector::new(0.1, 0.2, 3.0))
    }

    fn tick(n: u64) -> ChannelMessage {
        let r = reading();
        ChannelMessage::Tick(TickMessage {
            result: TickResult { timestamp: r.timestamp, readings: r.values, predictions: None, alerts: AlertSet::new() },
            metadata: TickMetadata { tick_count: n, total_readings: 1, cursor_position: 0 },
        })
    }

    #[test]
    fn no_greeting_without_snapshot() {
        let hub = BroadcastHub::default();
        let rx = hub.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn greets_with_latest_snapshot() {
        let hub = BroadcastHub::default();
        hub.update_snapshot(Some(&reading()));
        let rx = hub.subscribe();
        match rx.try_recv().unwrap() {
            ChannelMessage::Connect(msg) => {
                assert_eq!(msg.readings, reading());
                assert!(msg.predictions.is_empty());
                assert!(msg.alerts.values().all(|&a| !a));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fans_out_to_all_subscribers() {
        let hub = BroadcastHub::default();
        let a = hub.subscribe();
        let b = hub.subscribe();
        hub.broadcast(&tick(1));
        assert_eq!(a.try_recv().unwrap(), tick(1));
        assert_eq!(b.try_recv().unwrap(), tick(1));
    }

    #[test]
    fn prunes_disconnected_and_drops_when_full() {
        let hub = BroadcastHub::new(1);
        let slow = hub.subscribe();
        drop(hub.subscribe());
        hub.broadcast(&tick(1));
        hub.broadcast(&tick(2));
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(slow.try_recv().unwrap(), tick(1));
        assert!(slow.try_recv().is_err());
    }

    #[test]
    fn close_disconnects_receivers() {
        let hub = BroadcastHub::default();
        let rx = hub.subscribe();
        hub.close();
        assert!(rx.recv().is_err());
        let late = hub.subscribe();
        assert!(late.recv().is_err());
    }
}
