// ── Subscription handles ──

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;
use strum::Display;

use super::channel::{Channel, Slot};
use super::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionState {
    Active,
    Disposed,
}

/// Type-erased registration.
///
/// Holds the slot weakly: the channel owns it, so once the channel lets go
/// (dispose or `clear_all`) the callback and everything it captured drop.
pub(crate) trait Registration: Send + Sync {
    fn revoke(&self) -> bool;
    fn is_active(&self) -> bool;
    fn delivered(&self) -> u64;
}

pub(crate) struct SlotRegistration<M: Message> {
    slot: Weak<Slot<M>>,
    channel: Weak<Channel<M>>,
    delivered: Arc<AtomicU64>,
}

impl<M: Message> SlotRegistration<M> {
    pub(crate) fn new(slot: &Arc<Slot<M>>, channel: &Arc<Channel<M>>) -> Self {
        Self {
            slot: Arc::downgrade(slot),
            channel: Arc::downgrade(channel),
            delivered: slot.delivered_counter(),
        }
    }
}

impl<M: Message> Registration for SlotRegistration<M> {
    fn revoke(&self) -> bool {
        let Some(slot) = self.slot.upgrade() else {
            return false;
        };
        if !slot.dispose() {
            return false;
        }
        if let Some(channel) = self.channel.upgrade() {
            channel.unregister(slot.id);
        }
        true
    }

    fn is_active(&self) -> bool {
        self.slot.upgrade().is_some_and(|slot| slot.is_active())
    }

    fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// Owner of one subscription.
///
/// Disposing is idempotent and can happen from any thread, including from
/// inside a callback. Dropping the handle disposes the subscription.
#[must_use = "dropping a SubscriptionHandle disposes the subscription"]
pub struct SubscriptionHandle {
    id: u64,
    registration: Arc<dyn Registration>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, registration: Arc<dyn Registration>) -> Self {
        Self { id, registration }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop delivery. Outside a callback this waits for every in-flight
    /// invocation to finish; afterwards the callback never runs again.
    /// Inside a callback it only stops new invocations from starting.
    /// Returns `true` if this call did the disposing.
    pub fn dispose(&self) -> bool {
        self.registration.revoke()
    }

    pub fn state(&self) -> SubscriptionState {
        if self.registration.is_active() {
            SubscriptionState::Active
        } else {
            SubscriptionState::Disposed
        }
    }

    pub fn is_active(&self) -> bool {
        self.registration.is_active()
    }

    /// Number of times the callback has run.
    pub fn delivered(&self) -> u64 {
        self.registration.delivered()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registration.revoke();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// A bag of subscriptions disposed together, e.g. everything one view owns.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    handles: Vec<SubscriptionHandle>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: SubscriptionHandle) -> &mut Self {
        self.handles.push(handle);
        self
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_active()).count()
    }

    /// Dispose and forget every held subscription. Returns how many were
    /// still active.
    pub fn dispose_all(&mut self) -> usize {
        self.handles.drain(..).filter(|h| h.dispose()).count()
    }
}

impl Extend<SubscriptionHandle> for SubscriptionSet {
    fn extend<I: IntoIterator<Item = SubscriptionHandle>>(&mut self, iter: I) {
        self.handles.extend(iter);
    }
}

impl FromIterator<SubscriptionHandle> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = SubscriptionHandle>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}
