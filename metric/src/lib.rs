//! In-process metric primitives: a process-wide [`Registry`] of named
//! metrics, each fanned out into per-attribute-set recorders.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use parking_lot::Mutex;
use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A sorted set of key-value pairs identifying one recorder of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attributes(BTreeMap<&'static str, Cow<'static, str>>);

impl Attributes {
    /// Value for `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_ref())
    }
}

impl<const N: usize> From<[(&'static str, &'static str); N]> for Attributes {
    fn from(pairs: [(&'static str, &'static str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k, Cow::Borrowed(v)))
                .collect(),
        )
    }
}

impl From<&[(&'static str, String)]> for Attributes {
    fn from(pairs: &[(&'static str, String)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (*k, Cow::Owned(v.clone())))
                .collect(),
        )
    }
}

/// A named metric: a family of recorders of type `T`, one per attribute set.
#[derive(Debug)]
pub struct Metric<T> {
    /// Metric name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    recorders: Mutex<BTreeMap<Attributes, T>>,
}

impl<T: Clone + Default + Debug> Metric<T> {
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            recorders: Mutex::new(BTreeMap::new()),
        }
    }

    /// The recorder for `attributes`, created on first use.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T {
        self.recorders
            .lock()
            .entry(attributes.into())
            .or_default()
            .clone()
    }

    /// Observe the recorder registered for `attributes`, if any.
    pub fn get_observer(&self, attributes: &Attributes) -> Option<T> {
        self.recorders.lock().get(attributes).cloned()
    }
}

/// Owns every metric in the process; hand one `Arc<Registry>` to each
/// component that reports.
#[derive(Debug, Default)]
pub struct Registry {
    metrics: Mutex<BTreeMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The metric named `name`, registering it on first use. Re-registering
    /// with the same name and type returns the existing metric.
    ///
    /// # Panics
    ///
    /// If `name` was already registered with a different recorder type.
    pub fn register_metric<T>(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Arc<Metric<T>>
    where
        T: Clone + Default + Debug + Send + Sync + 'static,
    {
        let mut metrics = self.metrics.lock();
        let entry = metrics
            .entry(name)
            .or_insert_with(|| Arc::new(Metric::<T>::new(name, description)));
        Arc::clone(entry)
            .downcast::<Metric<T>>()
            .unwrap_or_else(|_| panic!("metric {name} registered with a different type"))
    }
}

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    /// Add `count`.
    pub fn inc(&self, count: u64) {
        self.0.fetch_add(count, Ordering::Relaxed);
    }

    /// Current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A value that can move both directions.
#[derive(Debug, Clone, Default)]
pub struct U64Gauge(Arc<AtomicU64>);

impl U64Gauge {
    /// Set the value.
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Add `delta`.
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Subtract `delta`.
    pub fn dec(&self, delta: u64) {
        self.0.fetch_sub(delta, Ordering::Relaxed);
    }

    /// Current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_recorders_share_state_per_attribute_set() {
        let registry = Registry::new();
        let metric = registry.register_metric::<U64Counter>("requests", "requests issued");

        let ok = metric.recorder([("result", "ok")]);
        let ok_again = metric.recorder([("result", "ok")]);
        let err = metric.recorder([("result", "error")]);

        ok.inc(2);
        ok_again.inc(1);
        err.inc(5);

        assert_eq!(ok.fetch(), 3);
        assert_eq!(
            metric
                .get_observer(&Attributes::from([("result", "error")]))
                .unwrap()
                .fetch(),
            5
        );
    }

    #[test]
    fn reregistering_returns_same_metric() {
        let registry = Registry::new();
        let a = registry.register_metric::<U64Gauge>("queue_depth", "queued tasks");
        let b = registry.register_metric::<U64Gauge>("queue_depth", "queued tasks");
        a.recorder(Attributes::default()).set(7);
        assert_eq!(b.recorder(Attributes::default()).fetch(), 7);
    }

    #[test]
    #[should_panic(expected = "different type")]
    fn type_mismatch_panics() {
        let registry = Registry::new();
        registry.register_metric::<U64Counter>("m", "");
        registry.register_metric::<U64Gauge>("m", "");
    }
}
