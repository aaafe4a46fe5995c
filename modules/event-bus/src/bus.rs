//! The global signal registry and the per-owner bus handle

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::trace;

use crate::error::{EventBusError, EventBusResult};
use crate::key::Key;
use crate::metrics;
use crate::signal::{PublisherEntry, PublisherFn, Requirement, Signal, SubscriberEntry, SubscriberFn};
use crate::tag::TypeTag;

/// The process-wide mapping of keys to signals. Entry creation and removal
/// are atomic per key; everything else holds only the signal's own lock.
static SIGNALS: Lazy<DashMap<Key, Arc<Signal>>> = Lazy::new(DashMap::new);

fn signal_for(key: &Key) -> Arc<Signal> {
    SIGNALS
        .entry(key.clone())
        .or_insert_with(|| Arc::new(Signal::default()))
        .clone()
}

fn lookup(key: &Key) -> Option<Arc<Signal>> {
    SIGNALS.get(key).map(|entry| entry.clone())
}

/// Drop the registry entry for `key` if nothing references it anymore.
fn collect_if_empty(key: &Key) {
    SIGNALS.remove_if(key, |_, signal| signal.is_empty());
}

/// Subscriber and publisher counts for a key, for diagnostics and tests.
pub fn signal_stats(key: impl Into<Key>) -> Option<(usize, usize)> {
    lookup(&key.into()).map(|signal| signal.stats())
}

/// Release every thread blocked in [`BusHandle::wait`] anywhere in the
/// process. Called once on shutdown; waits woken this way report
/// [`EventBusError::WaitCancelled`].
pub fn cancel_all_waits() {
    for entry in SIGNALS.iter() {
        entry.value().cancel_waits();
    }
}

/// Release only the threads blocked in [`BusHandle::wait`] on subscriptions
/// enrolled under `channel`. This is the stop edge for one pipeline's
/// modules; required waits belonging to other channels keep blocking until
/// their own payload or shutdown arrives.
pub fn cancel_waits_on_channel(channel: u32) {
    for entry in SIGNALS.iter() {
        entry.value().cancel_waits_on_channel(channel);
    }
}

struct SubscriptionRecord {
    key: Key,
    entry: Arc<SubscriberEntry>,
    signal: Arc<Signal>,
}

struct PublisherRecord {
    key: Key,
    entry: Arc<PublisherEntry>,
    signal: Arc<Signal>,
}

/// A per-owner view over the global signal registry.
///
/// Every endpoint enrolled through a handle is tracked by it and removed
/// again when the handle is reset or dropped. The handle also remembers
/// which of its subscriptions are [`Requirement::Required`], which is the
/// set [`BusHandle::wait`] blocks on.
///
/// The channel integer namespaces handles belonging to different pipelines;
/// the key space itself is process-global, because endpoints routinely cross
/// graph boundaries.
pub struct BusHandle {
    channel: u32,
    subscriptions: Vec<SubscriptionRecord>,
    publishers: Vec<PublisherRecord>,
}

impl Default for BusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl BusHandle {
    pub fn new() -> Self {
        Self::with_channel(0)
    }

    pub fn with_channel(channel: u32) -> Self {
        Self {
            channel,
            subscriptions: Vec::new(),
            publishers: Vec::new(),
        }
    }

    /// The channel this handle transfers data on.
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Change the channel. Applies to endpoints enrolled after the call;
    /// modules set their channel in `subscribe` before enrolling anything.
    pub fn set_channel(&mut self, channel: u32) {
        self.channel = channel;
    }

    /// Enroll a subscriber for values of type `T` on `key`.
    ///
    /// Re-enrolling the same `(key, type)` pair replaces the previous
    /// subscription instead of duplicating it.
    pub fn subscribe<T, F>(&mut self, key: impl Into<Key>, requirement: Requirement, handler: F)
    where
        T: 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let target: Box<SubscriberFn> = Box::new(move |payload, _index| {
            if let Some(value) = payload.downcast_ref::<T>() {
                handler(value);
            }
        });
        self.enroll_subscriber(key.into(), TypeTag::of::<T>(), requirement, target);
    }

    /// Enroll a subscriber that also receives the emit index.
    pub fn subscribe_indexed<T, F>(
        &mut self,
        key: impl Into<Key>,
        requirement: Requirement,
        handler: F,
    ) where
        T: 'static,
        F: Fn(u32, &T) + Send + Sync + 'static,
    {
        let target: Box<SubscriberFn> = Box::new(move |payload, index| {
            if let Some(value) = payload.downcast_ref::<T>() {
                handler(index, value);
            }
        });
        self.enroll_subscriber(key.into(), TypeTag::of::<T>(), requirement, target);
    }

    /// Enroll a subscriber matching every emitted type on `key`. The payload
    /// arrives type-erased; validating it is the subscriber's business.
    pub fn subscribe_universal<F>(&mut self, key: impl Into<Key>, requirement: Requirement, handler: F)
    where
        F: Fn(&dyn Any, u32) + Send + Sync + 'static,
    {
        let target: Box<SubscriberFn> = Box::new(handler);
        self.enroll_subscriber(key.into(), TypeTag::UNIVERSAL, requirement, target);
    }

    /// Enroll a publisher source for `key`, pulsed by [`BusHandle::emit_all`].
    pub fn publish_with<T, F>(&mut self, key: impl Into<Key>, source: F)
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let source: Box<PublisherFn> = Box::new(move |_index| Box::new(source()));
        self.enroll_publisher(key.into(), TypeTag::of::<T>(), source);
    }

    /// Enroll a publisher source that honors the pulse index.
    pub fn publish_indexed_with<T, F>(&mut self, key: impl Into<Key>, source: F)
    where
        T: Any + Send,
        F: Fn(u32) -> T + Send + Sync + 'static,
    {
        let source: Box<PublisherFn> = Box::new(move |index| Box::new(source(index)));
        self.enroll_publisher(key.into(), TypeTag::of::<T>(), source);
    }

    /// Manually emit one value to every matching subscriber on `key`.
    ///
    /// All subscribers on the key whose tag is the value's type or universal
    /// see the value before this call returns; a key without subscribers is
    /// a no-op.
    pub fn emit<T: Any>(&self, value: &T, key: impl Into<Key>) {
        self.emit_indexed(value, 0, key);
    }

    /// Manually emit one value under an explicit index.
    pub fn emit_indexed<T: Any>(&self, value: &T, index: u32, key: impl Into<Key>) {
        let key = key.into();
        if let Some(signal) = lookup(&key) {
            trace!(key = %key, index, channel = self.channel, "emit");
            signal.emit(value, &TypeTag::of::<T>(), index);
        }
    }

    /// Pulse every publisher enrolled on this handle: run each source and
    /// deliver its value to the subscribers on the same key accepting the
    /// publisher's tag.
    pub fn emit_all(&self, index: u32) {
        for record in &self.publishers {
            trace!(key = %record.key, index, channel = self.channel, "pulse");
            record.signal.pulse_publisher(record.entry.id, index);
        }
    }

    /// Block until every required subscription on this handle has been
    /// delivered to at least once since the previous wait consumed it.
    ///
    /// Each required subscription's fired flag is consumed (reset) by the
    /// wait that observes it. The only way out other than delivery is
    /// shutdown, reported as [`EventBusError::WaitCancelled`].
    pub fn wait(&self) -> EventBusResult<()> {
        for record in &self.subscriptions {
            if record.entry.requirement == Requirement::Required && !record.entry.wait() {
                return Err(EventBusError::WaitCancelled {
                    key: record.key.as_str().to_owned(),
                });
            }
        }
        metrics::global().record_wait_completed();
        Ok(())
    }

    /// Release any thread currently blocked in [`BusHandle::wait`] on this
    /// handle's subscriptions.
    pub fn cancel_waits(&self) {
        for record in &self.subscriptions {
            record.entry.cancel();
        }
    }

    /// Remove every subscriber this handle enrolled from the registry.
    pub fn clear_subscriptions(&mut self) {
        for record in self.subscriptions.drain(..) {
            record.entry.cancel();
            record.signal.remove_subscriber(record.entry.id);
            collect_if_empty(&record.key);
        }
    }

    /// Remove every endpoint this handle enrolled from the registry.
    pub fn reset(&mut self) {
        self.clear_subscriptions();
        for record in self.publishers.drain(..) {
            record.signal.remove_publisher(record.entry.id);
            collect_if_empty(&record.key);
        }
    }

    fn enroll_subscriber(
        &mut self,
        key: Key,
        tag: TypeTag,
        requirement: Requirement,
        target: Box<SubscriberFn>,
    ) {
        // Re-enrolling a (key, tag) pair replaces, never duplicates.
        if let Some(position) = self
            .subscriptions
            .iter()
            .position(|r| r.key == key && r.entry.tag == tag)
        {
            let old = self.subscriptions.remove(position);
            old.entry.cancel();
            old.signal.remove_subscriber(old.entry.id);
        }

        let signal = signal_for(&key);
        let entry = SubscriberEntry::new(self.channel, tag, requirement, target);
        signal.insert_subscriber(entry.clone());
        trace!(key = %key, tag = tag.type_name(), ?requirement, "subscriber enrolled");
        self.subscriptions.push(SubscriptionRecord { key, entry, signal });
    }

    fn enroll_publisher(&mut self, key: Key, tag: TypeTag, source: Box<PublisherFn>) {
        if let Some(position) = self
            .publishers
            .iter()
            .position(|r| r.key == key && r.entry.tag == tag)
        {
            let old = self.publishers.remove(position);
            old.signal.remove_publisher(old.entry.id);
        }

        let signal = signal_for(&key);
        let entry = PublisherEntry::new(tag, source);
        signal.insert_publisher(entry.clone());
        trace!(key = %key, tag = tag.type_name(), "publisher enrolled");
        self.publishers.push(PublisherRecord { key, entry, signal });
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn emit_delivers_to_typed_subscriber() {
        let mut bus = BusHandle::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        bus.subscribe::<u32, _>("bus-test::typed", Requirement::Optional, move |v| {
            seen2.store(*v, Ordering::SeqCst);
        });

        bus.emit(&41u32, "bus-test::typed");
        assert_eq!(seen.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn emit_on_unsubscribed_key_is_a_noop() {
        let bus = BusHandle::new();
        bus.emit(&1u32, "bus-test::nobody-listens");
        assert!(signal_stats("bus-test::nobody-listens").is_none());
    }

    #[test]
    fn wrong_typed_payloads_are_skipped() {
        let mut bus = BusHandle::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        bus.subscribe::<u32, _>("bus-test::mistyped", Requirement::Optional, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&"not a u32".to_owned(), "bus-test::mistyped");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.emit(&5u32, "bus-test::mistyped");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reenroll_replaces_instead_of_duplicating() {
        let mut bus = BusHandle::new();
        let hits = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            bus.subscribe::<u32, _>("bus-test::replace", Requirement::Optional, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (subs, _) = signal_stats("bus-test::replace").unwrap();
        assert_eq!(subs, 1);

        bus.emit(&1u32, "bus-test::replace");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_removes_every_endpoint_from_the_registry() {
        let mut bus = BusHandle::new();
        bus.subscribe::<u32, _>("bus-test::reset", Requirement::Optional, |_| {});
        bus.publish_with("bus-test::reset", || 3u32);
        assert_eq!(signal_stats("bus-test::reset"), Some((1, 1)));

        bus.reset();
        assert!(signal_stats("bus-test::reset").is_none());
    }

    #[test]
    fn drop_behaves_like_reset() {
        {
            let mut bus = BusHandle::new();
            bus.subscribe::<u32, _>("bus-test::drop", Requirement::Optional, |_| {});
        }
        assert!(signal_stats("bus-test::drop").is_none());
    }

    #[test]
    fn pulse_delivers_published_values() {
        let mut bus = BusHandle::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe_indexed::<u32, _>("bus-test::pulse", Requirement::Optional, move |i, v| {
            seen2.lock().unwrap().push((i, *v));
        });
        bus.publish_indexed_with("bus-test::pulse", |index| index * 10);

        bus.emit_all(2);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(2, 20)]);
    }

    #[test]
    fn pulse_does_not_double_deliver_to_universal_subscriber() {
        let mut bus = BusHandle::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        bus.subscribe_universal("bus-test::pulse-universal", Requirement::Optional, move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish_with("bus-test::pulse-universal", || 1u32);

        bus.emit_all(0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn universal_subscriber_sees_every_type() {
        let mut bus = BusHandle::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        bus.subscribe_universal("bus-test::universal", Requirement::Optional, move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&1u32, "bus-test::universal");
        bus.emit(&"text".to_owned(), "bus-test::universal");
        bus.emit(&false, "bus-test::universal");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn channel_is_carried_on_the_handle() {
        let mut bus = BusHandle::with_channel(4);
        assert_eq!(bus.channel(), 4);
        bus.set_channel(7);
        assert_eq!(bus.channel(), 7);
    }
}
