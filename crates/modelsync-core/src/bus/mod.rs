// ── Change-notification bus ──
//
// Typed publish/subscribe. Each message type gets its own channel; entity
// change notifications (`ObjectChange`) are one such type. Delivery is
// synchronous for `Scheduler::Immediate` subscriptions and posted to a
// `DispatchQueue` for queued ones.

mod channel;
mod fault;
mod message;
mod scheduler;
mod stream;
mod subscription;

use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::config::BusConfig;

use self::channel::{AnyChannel, Callback, Channel, DeliveryShared, Slot};
use self::subscription::SlotRegistration;

pub use fault::{FaultObserver, FaultReason, SubscriberError, SubscriberFault, TracingFaultObserver};
pub use message::{ChangeFilter, ChangeTarget, EventKind, Message, ObjectChange};
pub use scheduler::{DispatchQueue, QueueHandle, Scheduler};
pub use stream::MessageStream;
pub use subscription::{SubscriptionHandle, SubscriptionSet, SubscriptionState};

/// Stream of entity change notifications.
pub type ChangeStream = MessageStream<ObjectChange>;

/// The publish/subscribe hub. Cheaply cloneable; clones share subscribers.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    channels: DashMap<TypeId, Arc<dyn AnyChannel>>,
    next_id: AtomicU64,
    delivery: Arc<DeliveryShared>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_config(&BusConfig::default())
    }

    pub fn with_config(config: &BusConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingFaultObserver))
    }

    /// Bus reporting subscriber faults to `observer` instead of the log.
    pub fn with_observer(config: &BusConfig, observer: Arc<dyn FaultObserver>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
                delivery: Arc::new(DeliveryShared {
                    observer,
                    slow_threshold: config.slow_callback_threshold,
                    faults: AtomicU64::new(0),
                }),
            }),
        }
    }

    // ── Entity changes ───────────────────────────────────────────────

    /// Publish an entity change. Returns the number of subscriptions it was
    /// dispatched to; immediate ones have already run when this returns.
    pub fn publish(&self, change: &ObjectChange) -> usize {
        self.send(change)
    }

    /// Subscribe to entity changes matching `filter`.
    pub fn subscribe(
        &self,
        filter: ChangeFilter,
        scheduler: Scheduler,
        callback: impl Fn(&ObjectChange) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.listen(filter, scheduler, callback)
    }

    /// Async stream of entity changes matching `filter`.
    pub fn watch(&self, filter: ChangeFilter) -> ChangeStream {
        self.watch_messages(filter)
    }

    // ── Arbitrary messages ───────────────────────────────────────────

    /// Publish any message type.
    pub fn send<M: Message>(&self, msg: &M) -> usize {
        let Some(channel) = self.existing_channel::<M>() else {
            tracing::trace!(message_type = type_name::<M>(), "no subscribers");
            return 0;
        };
        let dispatched = channel.deliver(msg, &self.inner.delivery);
        tracing::trace!(message_type = type_name::<M>(), dispatched, "message delivered");
        dispatched
    }

    pub fn listen<M: Message>(
        &self,
        filter: M::Filter,
        scheduler: Scheduler,
        callback: impl Fn(&M) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.register(
            filter,
            scheduler,
            Box::new(move |msg: &M| {
                callback(msg);
                Ok(())
            }),
        )
    }

    /// Like [`listen`](Self::listen), for callbacks that can fail. An error
    /// return is reported to the fault observer like a panic.
    pub fn try_listen<M: Message>(
        &self,
        filter: M::Filter,
        scheduler: Scheduler,
        callback: impl Fn(&M) -> Result<(), SubscriberError> + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.register(filter, scheduler, Box::new(callback))
    }

    pub fn watch_messages<M: Message>(&self, filter: M::Filter) -> MessageStream<M> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.listen(filter, Scheduler::Immediate, move |msg: &M| {
            // Receiver gone means the stream is being dropped.
            let _ = tx.send(msg.clone());
        });
        MessageStream::new(rx, handle)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Dispose every active subscription on every channel. Returns how many
    /// were disposed.
    pub fn clear_all(&self) -> usize {
        let channels: Vec<Arc<dyn AnyChannel>> = self
            .inner
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let disposed = channels.iter().map(|c| c.dispose_all()).sum();
        tracing::debug!(disposed, "cleared all subscriptions");
        disposed
    }

    /// Active subscriptions across all message types.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .channels
            .iter()
            .map(|entry| entry.value().active_count())
            .sum()
    }

    pub fn subscriber_count_of<M: Message>(&self) -> usize {
        self.existing_channel::<M>()
            .map_or(0, |c| c.active_count())
    }

    /// Subscriber failures reported since the bus was created.
    pub fn fault_count(&self) -> u64 {
        self.inner.delivery.faults.load(Ordering::Relaxed)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn register<M: Message>(
        &self,
        filter: M::Filter,
        scheduler: Scheduler,
        callback: Callback<M>,
    ) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let channel = self.channel::<M>();
        let slot = Arc::new(Slot::new(id, filter, scheduler, callback));
        let registration = SlotRegistration::new(&slot, &channel);
        channel.register(slot);
        tracing::trace!(subscription = id, message_type = type_name::<M>(), "subscribed");
        SubscriptionHandle::new(id, Arc::new(registration))
    }

    fn existing_channel<M: Message>(&self) -> Option<Arc<Channel<M>>> {
        let erased = self
            .inner
            .channels
            .get(&TypeId::of::<M>())
            .map(|entry| Arc::clone(entry.value()))?;
        erased.as_any().downcast::<Channel<M>>().ok()
    }

    fn channel<M: Message>(&self) -> Arc<Channel<M>> {
        let erased = Arc::clone(
            self.inner
                .channels
                .entry(TypeId::of::<M>())
                .or_insert_with(|| -> Arc<dyn AnyChannel> { Arc::new(Channel::<M>::new()) })
                .value(),
        );
        match erased.as_any().downcast::<Channel<M>>() {
            Ok(channel) => channel,
            Err(_) => unreachable!("channels are keyed by their message TypeId"),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("channels", &self.inner.channels.len())
            .field("subscribers", &self.subscriber_count())
            .field("faults", &self.fault_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use chrono::Utc;
    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::model::{CacheId, CacheKey, ClassKind};

    fn change(iid: Uuid, kind: EventKind) -> ObjectChange {
        ObjectChange {
            key: CacheKey::new(iid),
            class_kind: ClassKind::from_static("Option"),
            kind,
            revision: 1,
            cache: CacheId::new(),
            container: None,
            published_at: Utc::now(),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&ObjectChange) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move |_: &ObjectChange| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn immediate_delivery_runs_before_publish_returns() {
        let bus = MessageBus::new();
        let iid = Uuid::new_v4();
        let (hits, cb) = counter();
        let _h = bus.subscribe(ChangeFilter::identity(iid), Scheduler::Immediate, cb);

        assert_eq!(bus.publish(&change(iid, EventKind::Updated)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.publish(&change(Uuid::new_v4(), EventKind::Updated)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let bus = MessageBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let order = Arc::clone(&order);
                bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, move |_| {
                    order.lock().push(i);
                })
            })
            .collect();
        bus.publish(&change(Uuid::new_v4(), EventKind::Added));
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(handles.len(), 4);
    }

    #[test]
    fn disposed_subscription_is_never_invoked() {
        let bus = MessageBus::new();
        let (hits, cb) = counter();
        let handle = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, cb);
        assert!(handle.dispose());
        assert!(!handle.dispose());
        assert_eq!(handle.state(), SubscriptionState::Disposed);
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropping_the_handle_disposes() {
        let bus = MessageBus::new();
        let (hits, cb) = counter();
        drop(bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, cb));
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let faults = Arc::new(Mutex::new(Vec::<SubscriberFault>::new()));
        let sink = Arc::clone(&faults);
        let bus = MessageBus::with_observer(
            &BusConfig::default(),
            Arc::new(move |fault: &SubscriberFault| sink.lock().push(fault.clone())),
        );
        let (before, cb_before) = counter();
        let (after, cb_after) = counter();
        let _a = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, cb_before);
        let bad = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, |_| {
            panic!("subscriber exploded");
        });
        let _c = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, cb_after);

        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));

        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        let faults = faults.lock();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].subscription, bad.id());
        assert_eq!(
            faults[0].reason,
            FaultReason::Panicked("subscriber exploded".into())
        );
        assert_eq!(bus.fault_count(), 1);
    }

    #[test]
    fn failing_subscriber_is_reported_once() {
        let reports = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&reports);
        let bus = MessageBus::with_observer(
            &BusConfig::default(),
            Arc::new(move |_: &SubscriberFault| {
                r.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let _h = bus.try_listen(ChangeFilter::all(), Scheduler::Immediate, |_: &ObjectChange| {
            Err(SubscriberError::new("view model rejected change"))
        });
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        assert_eq!(reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queued_delivery_waits_for_the_queue() {
        let bus = MessageBus::new();
        let mut queue = DispatchQueue::new();
        let (hits, cb) = counter();
        let _h = bus.subscribe(ChangeFilter::all(), queue.scheduler(), cb);

        assert_eq!(bus.publish(&change(Uuid::new_v4(), EventKind::Updated)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposal_before_the_queue_drains_suppresses_delivery() {
        let bus = MessageBus::new();
        let mut queue = DispatchQueue::new();
        let (hits, cb) = counter();
        let handle = bus.subscribe(ChangeFilter::all(), queue.scheduler(), cb);
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        handle.dispose();
        queue.run_pending();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscriber_can_dispose_itself_mid_delivery() {
        let bus = MessageBus::new();
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));
        let (s, h) = (Arc::clone(&slot), Arc::clone(&hits));
        let handle = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(own) = s.lock().as_ref() {
                own.dispose();
            }
        });
        *slot.lock() = Some(handle);

        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_waits_for_a_callback_running_elsewhere() {
        let bus = MessageBus::new();
        let entered = Arc::new(Barrier::new(2));
        let finished = Arc::new(AtomicBool::new(false));
        let (e, f) = (Arc::clone(&entered), Arc::clone(&finished));
        let handle = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, move |_| {
            e.wait();
            std::thread::sleep(Duration::from_millis(50));
            f.store(true, Ordering::SeqCst);
        });

        std::thread::scope(|s| {
            s.spawn(|| bus.publish(&change(Uuid::new_v4(), EventKind::Updated)));
            entered.wait();
            assert!(handle.dispose());
            assert!(finished.load(Ordering::SeqCst));
        });
    }

    #[test]
    fn subscribing_during_delivery_takes_effect_next_publish() {
        let bus = MessageBus::new();
        let late_hits = Arc::new(AtomicUsize::new(0));
        let late_handles = Arc::new(Mutex::new(Vec::new()));
        let (b, lh, hs) = (bus.clone(), Arc::clone(&late_hits), Arc::clone(&late_handles));
        let _h = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, move |_| {
            if hs.lock().is_empty() {
                let lh = Arc::clone(&lh);
                hs.lock().push(b.subscribe(ChangeFilter::all(), Scheduler::Immediate, move |_| {
                    lh.fetch_add(1, Ordering::SeqCst);
                }));
            }
        });
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_all_covers_every_message_type() {
        #[derive(Clone)]
        struct Highlight;
        impl Message for Highlight {
            type Filter = ();
            fn matches(&self, _filter: &()) -> bool {
                true
            }
        }

        let bus = MessageBus::new();
        let (hits, cb) = counter();
        let a = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, cb);
        let b = bus.listen((), Scheduler::Immediate, |_: &Highlight| {});
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.subscriber_count_of::<Highlight>(), 1);

        assert_eq!(bus.clear_all(), 2);
        assert!(!a.is_active());
        assert!(!b.is_active());
        assert_eq!(bus.send(&Highlight), 0);
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn delivered_count_survives_disposal() {
        let bus = MessageBus::new();
        let handle = bus.subscribe(ChangeFilter::all(), Scheduler::Immediate, |_| {});
        bus.publish(&change(Uuid::new_v4(), EventKind::Added));
        bus.publish(&change(Uuid::new_v4(), EventKind::Added));
        bus.clear_all();
        assert_eq!(handle.delivered(), 2);
    }

    #[tokio::test]
    async fn watch_yields_matching_changes_and_ends_on_clear() {
        let bus = MessageBus::new();
        let iid = Uuid::new_v4();
        let mut stream = bus.watch(ChangeFilter::identity(iid));
        bus.publish(&change(Uuid::new_v4(), EventKind::Updated));
        bus.publish(&change(iid, EventKind::Removed));

        let got = stream.recv().await.unwrap();
        assert_eq!(got.iid(), iid);
        assert_eq!(got.kind, EventKind::Removed);

        bus.clear_all();
        assert!(stream.recv().await.is_none());
    }
}
