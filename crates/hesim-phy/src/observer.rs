//! Notification sinks for PHY events.

use hesim_common::{EntityId, EventPayload, PhyIndicationEvent, PhyNotification, SimContext, SimTime};
use parking_lot::Mutex;
use std::sync::Arc;

/// Receives every notification a PHY raises.
pub trait PhyObserver: Send {
    /// Handle a notification raised by `phy` at the context's current time.
    fn notify(&mut self, ctx: &mut SimContext, phy: EntityId, notification: &PhyNotification);
}

/// Discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl PhyObserver for NullObserver {
    fn notify(&mut self, _ctx: &mut SimContext, _phy: EntityId, _notification: &PhyNotification) {}
}

/// Forwards notifications as immediate events to an upper-layer entity.
#[derive(Debug, Clone, Copy)]
pub struct ForwardingObserver {
    target: EntityId,
}

impl ForwardingObserver {
    /// Forward to `target`.
    pub fn new(target: EntityId) -> Self {
        ForwardingObserver { target }
    }
}

impl PhyObserver for ForwardingObserver {
    fn notify(&mut self, ctx: &mut SimContext, phy: EntityId, notification: &PhyNotification) {
        ctx.post_immediate(
            vec![self.target],
            EventPayload::PhyIndication(PhyIndicationEvent {
                phy,
                notification: notification.clone(),
            }),
        );
    }
}

/// Shared log of timestamped notifications.
pub type NotificationLog = Arc<Mutex<Vec<(SimTime, PhyNotification)>>>;

/// Records notifications into a shared log.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    log: NotificationLog,
}

impl RecordingObserver {
    /// Create an observer with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the log, valid after the observer is moved into a PHY.
    pub fn log(&self) -> NotificationLog {
        Arc::clone(&self.log)
    }
}

impl PhyObserver for RecordingObserver {
    fn notify(&mut self, ctx: &mut SimContext, _phy: EntityId, notification: &PhyNotification) {
        self.log.lock().push((ctx.time(), notification.clone()));
    }
}

/// Fans notifications out to several observers in order.
#[derive(Default)]
pub struct ObserverChain {
    observers: Vec<Box<dyn PhyObserver>>,
}

impl ObserverChain {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer.
    pub fn with(mut self, observer: Box<dyn PhyObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether the chain has no observers.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl PhyObserver for ObserverChain {
    fn notify(&mut self, ctx: &mut SimContext, phy: EntityId, notification: &PhyNotification) {
        for observer in &mut self.observers {
            observer.notify(ctx, phy, notification);
        }
    }
}
