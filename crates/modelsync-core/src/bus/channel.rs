// ── Per-message-type channel ──
//
// Subscribers live in a copy-on-write list: publishing takes a snapshot
// with one atomic load, so subscribing or disposing during a delivery never
// disturbs the delivery in progress.
//
// No lock is held while a callback runs. Every slot counts the callbacks
// in flight. A dispose made outside any delivery waits until the count
// drops to zero, so once it returns the callback is not running anywhere
// and will never run again. A dispose from inside a delivery on the same
// thread does not wait: it only guarantees that no new run starts, and a
// run already in progress on another thread may still finish.

use std::any::{Any, type_name};
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};

use super::fault::{FaultObserver, FaultReason, SubscriberError, SubscriberFault, panic_message};
use super::message::Message;
use super::scheduler::Scheduler;

pub(crate) type Callback<M> = Box<dyn Fn(&M) -> Result<(), SubscriberError> + Send + Sync>;

thread_local! {
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn in_delivery() -> bool {
    DELIVERY_DEPTH.with(Cell::get) > 0
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        DELIVERY_DEPTH.with(|d| d.set(d.get() + 1));
        Self
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

// ── Delivery settings shared by all channels of a bus ───────────────

pub(crate) struct DeliveryShared {
    pub(crate) observer: Arc<dyn FaultObserver>,
    pub(crate) slow_threshold: Duration,
    pub(crate) faults: AtomicU64,
}

impl DeliveryShared {
    fn report(&self, fault: &SubscriberFault) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        // A panicking observer must not take the publisher down with it.
        if catch_unwind(AssertUnwindSafe(|| self.observer.on_fault(fault))).is_err() {
            tracing::error!(subscription = fault.subscription, "fault observer panicked");
        }
    }
}

// ── Slot ────────────────────────────────────────────────────────────

pub(crate) struct Slot<M: Message> {
    pub(crate) id: u64,
    filter: M::Filter,
    scheduler: Scheduler,
    callback: Callback<M>,
    active: AtomicBool,
    in_flight: Mutex<usize>,
    idle: Condvar,
    delivered: Arc<AtomicU64>,
}

impl<M: Message> Slot<M> {
    pub(crate) fn new(id: u64, filter: M::Filter, scheduler: Scheduler, callback: Callback<M>) -> Self {
        Self {
            id,
            filter,
            scheduler,
            callback,
            active: AtomicBool::new(true),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Delivery counter that outlives the slot.
    pub(crate) fn delivered_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.delivered)
    }

    /// Deactivate. Returns `false` if already disposed.
    pub(crate) fn dispose(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if !in_delivery() {
            let mut running = self.in_flight.lock();
            while *running > 0 {
                self.idle.wait(&mut running);
            }
        }
        true
    }

    fn invoke(&self, msg: &M, shared: &DeliveryShared) {
        if !self.is_active() {
            return;
        }
        let _flight = FlightGuard::enter(self);
        // Disposal may have started before we were counted.
        if !self.is_active() {
            return;
        }

        let started = Instant::now();
        let outcome = {
            let _depth = DepthGuard::enter();
            catch_unwind(AssertUnwindSafe(|| (self.callback)(msg)))
        };
        self.delivered.fetch_add(1, Ordering::Relaxed);

        let elapsed = started.elapsed();
        if elapsed > shared.slow_threshold {
            tracing::warn!(
                subscription = self.id,
                message_type = type_name::<M>(),
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "slow subscriber callback"
            );
        }

        let reason = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => FaultReason::Failed(err.to_string()),
            Err(payload) => FaultReason::Panicked(panic_message(payload.as_ref())),
        };
        shared.report(&SubscriberFault {
            subscription: self.id,
            message_type: type_name::<M>(),
            reason,
        });
    }
}

/// Counts one callback in flight; wakes waiting disposers on exit.
struct FlightGuard<'a> {
    in_flight: &'a Mutex<usize>,
    idle: &'a Condvar,
}

impl<'a> FlightGuard<'a> {
    fn enter<M: Message>(slot: &'a Slot<M>) -> Self {
        *slot.in_flight.lock() += 1;
        Self {
            in_flight: &slot.in_flight,
            idle: &slot.idle,
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.in_flight.lock();
        *running = running.saturating_sub(1);
        if *running == 0 {
            self.idle.notify_all();
        }
    }
}

// ── Channel ─────────────────────────────────────────────────────────

pub(crate) struct Channel<M: Message> {
    slots: ArcSwap<Vec<Arc<Slot<M>>>>,
}

impl<M: Message> Channel<M> {
    pub(crate) fn new() -> Self {
        Self {
            slots: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub(crate) fn register(&self, slot: Arc<Slot<M>>) {
        self.slots.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&slot));
            next
        });
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.slots.rcu(|current| {
            current
                .iter()
                .filter(|s| s.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Deliver `msg` to every matching subscriber in registration order.
    /// Returns the number of subscribers it was dispatched to.
    pub(crate) fn deliver(&self, msg: &M, shared: &Arc<DeliveryShared>) -> usize {
        let snapshot = self.slots.load_full();
        let mut dispatched = 0;
        for slot in snapshot.iter() {
            if !slot.is_active() || !msg.matches(&slot.filter) {
                continue;
            }
            match &slot.scheduler {
                Scheduler::Immediate => slot.invoke(msg, shared),
                Scheduler::Queued(queue) => {
                    let id = slot.id;
                    let job_slot = Arc::clone(slot);
                    let msg = msg.clone();
                    let shared = Arc::clone(shared);
                    if !queue.post(Box::new(move || job_slot.invoke(&msg, &shared))) {
                        tracing::debug!(subscription = id, "dispatch queue is gone, skipping");
                        continue;
                    }
                }
            }
            dispatched += 1;
        }
        dispatched
    }
}

/// Type-erased view of a channel, for bus-wide operations.
pub(crate) trait AnyChannel: Send + Sync {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn dispose_all(&self) -> usize;
    fn active_count(&self) -> usize;
}

impl<M: Message> AnyChannel for Channel<M> {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn dispose_all(&self) -> usize {
        let old = self.slots.swap(Arc::new(Vec::new()));
        old.iter().filter(|slot| slot.dispose()).count()
    }

    fn active_count(&self) -> usize {
        self.slots.load().iter().filter(|s| s.is_active()).count()
    }
}
