//! Per-key signal records: the subscriber and publisher tables one emit
//! routes through

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::metrics;
use crate::tag::TypeTag;

/// Whether the owning handle blocks on this subscription in `wait()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// Type-erased subscriber callback: payload pointer plus emit index.
pub(crate) type SubscriberFn = dyn Fn(&dyn Any, u32) + Send + Sync;

/// Type-erased publisher callback: emit index to produced payload.
pub(crate) type PublisherFn = dyn Fn(u32) -> Box<dyn Any + Send> + Send + Sync;

/// Blocking state for one subscriber entry. The fired flag is set on every
/// delivery and consumed (reset) by the wait that observes it.
struct WaitState {
    fired: Mutex<bool>,
    cv: Condvar,
    cancelled: AtomicBool,
}

pub(crate) struct SubscriberEntry {
    pub id: Uuid,
    /// Channel of the enrolling handle, captured at enroll time. Scopes
    /// cancellation to one pipeline's endpoints.
    pub channel: u32,
    pub tag: TypeTag,
    pub requirement: Requirement,
    target: Box<SubscriberFn>,
    wait: WaitState,
}

impl SubscriberEntry {
    pub fn new(
        channel: u32,
        tag: TypeTag,
        requirement: Requirement,
        target: Box<SubscriberFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            channel,
            tag,
            requirement,
            target,
            wait: WaitState {
                fired: Mutex::new(false),
                cv: Condvar::new(),
                cancelled: AtomicBool::new(false),
            },
        })
    }

    /// Invoke the callback and mark the subscription as fired.
    fn deliver(&self, payload: &dyn Any, index: u32) {
        (self.target)(payload, index);
        metrics::global().record_delivery();
        let mut fired = self.wait.fired.lock();
        *fired = true;
        self.wait.cv.notify_all();
    }

    /// Block until a delivery fires this entry, consuming the flag.
    /// Returns false if the wait was cancelled by shutdown instead; a
    /// cancellation is consumed the same way, releasing exactly one wait.
    pub fn wait(&self) -> bool {
        let mut fired = self.wait.fired.lock();
        while !*fired && !self.wait.cancelled.load(Ordering::Acquire) {
            self.wait.cv.wait(&mut fired);
        }
        if *fired {
            *fired = false;
            true
        } else {
            self.wait.cancelled.store(false, Ordering::Release);
            false
        }
    }

    /// Release any thread blocked in [`SubscriberEntry::wait`].
    pub fn cancel(&self) {
        self.wait.cancelled.store(true, Ordering::Release);
        let _fired = self.wait.fired.lock();
        self.wait.cv.notify_all();
    }
}

pub(crate) struct PublisherEntry {
    pub id: Uuid,
    pub tag: TypeTag,
    source: Box<PublisherFn>,
}

impl PublisherEntry {
    pub fn new(tag: TypeTag, source: Box<PublisherFn>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            tag,
            source,
        })
    }

    pub fn produce(&self, index: u32) -> Box<dyn Any + Send> {
        (self.source)(index)
    }
}

#[derive(Default)]
struct SignalTables {
    subscribers: Vec<Arc<SubscriberEntry>>,
    publishers: Vec<Arc<PublisherEntry>>,
}

/// The per-key record in the global registry.
///
/// Structural changes to the registry itself are atomic per key; everything
/// under one key is serialized on this signal's own mutex, so subscribers on
/// a key observe emits in global arrival order. Callbacks run while the lock
/// is held and must be short.
#[derive(Default)]
pub(crate) struct Signal {
    tables: Mutex<SignalTables>,
}

impl Signal {
    pub fn insert_subscriber(&self, entry: Arc<SubscriberEntry>) {
        self.tables.lock().subscribers.push(entry);
        metrics::global().record_subscriber_enrolled();
    }

    pub fn insert_publisher(&self, entry: Arc<PublisherEntry>) {
        self.tables.lock().publishers.push(entry);
        metrics::global().record_publisher_enrolled();
    }

    pub fn remove_subscriber(&self, id: Uuid) {
        self.tables.lock().subscribers.retain(|s| s.id != id);
    }

    pub fn remove_publisher(&self, id: Uuid) {
        self.tables.lock().publishers.retain(|p| p.id != id);
    }

    pub fn is_empty(&self) -> bool {
        let tables = self.tables.lock();
        tables.subscribers.is_empty() && tables.publishers.is_empty()
    }

    /// Current (subscriber, publisher) counts.
    pub fn stats(&self) -> (usize, usize) {
        let tables = self.tables.lock();
        (tables.subscribers.len(), tables.publishers.len())
    }

    /// Deliver one payload to every subscriber accepting `tag`.
    pub fn emit(&self, payload: &dyn Any, tag: &TypeTag, index: u32) {
        let tables = self.tables.lock();
        metrics::global().record_emit();
        for sub in tables.subscribers.iter() {
            if sub.tag.accepts(tag) {
                sub.deliver(payload, index);
            }
        }
    }

    /// Run one publisher, delivering its produced value to the subscribers
    /// accepting the publisher's tag. A subscriber that accepts through both
    /// its own tag and the universal tag still sees the value once.
    pub fn pulse_publisher(&self, id: Uuid, index: u32) {
        let tables = self.tables.lock();
        let Some(publisher) = tables.publishers.iter().find(|p| p.id == id) else {
            return;
        };
        let payload = publisher.produce(index);
        metrics::global().record_emit();
        for sub in tables.subscribers.iter() {
            if sub.tag.accepts(&publisher.tag) {
                sub.deliver(payload.as_ref(), index);
            }
        }
    }

    /// Release every waiter currently blocked on this signal.
    pub fn cancel_waits(&self) {
        let tables = self.tables.lock();
        for sub in tables.subscribers.iter() {
            sub.cancel();
        }
    }

    /// Release only the waiters whose handles were enrolled under `channel`.
    pub fn cancel_waits_on_channel(&self, channel: u32) {
        let tables = self.tables.lock();
        for sub in tables.subscribers.iter().filter(|s| s.channel == channel) {
            sub.cancel();
        }
    }
}
