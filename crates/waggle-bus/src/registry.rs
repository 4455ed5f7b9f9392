//! Subscription registry: topic patterns mapped to callbacks.
//!
//! The broker binding registers wildcard patterns; the group binding
//! registers exact room names. Either way there is at most one callback per
//! pattern; re-registering replaces the previous callback with a warning.

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::warn;
use waggle_protocol::TopicPattern;

/// Event callback: an explicit asynchronous interface, conformed to at
/// registration time. Callbacks must be re-entrant-safe; they may run for
/// many topics concurrently.
pub type EventCallback = Arc<dyn Fn(String, Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Adapt an async closure into an [`EventCallback`].
pub fn callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |topic, body| Box::pin(f(topic, body)))
}

struct Entry {
    pattern: TopicPattern,
    callback: EventCallback,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a callback for a pattern. Returns `true` when an existing
    /// callback was replaced (last writer wins).
    pub fn register(&self, pattern: TopicPattern, callback: EventCallback) -> bool {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if let Some(entry) = entries.iter_mut().find(|e| e.pattern.raw() == pattern.raw()) {
            warn!(pattern = %pattern.raw(), "callback already set, replacing");
            entry.callback = callback;
            return true;
        }
        entries.push(Entry { pattern, callback });
        false
    }

    /// Remove a pattern. No-op if absent.
    pub fn unregister(&self, pattern: &str) -> bool {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let before = entries.len();
        entries.retain(|e| e.pattern.raw() != pattern);
        entries.len() != before
    }

    /// Callbacks whose pattern matches the topic.
    pub fn matching(&self, topic: &str) -> Vec<EventCallback> {
        let entries = self.entries.lock().expect("registry lock poisoned");
        entries
            .iter()
            .filter(|e| e.pattern.matches(topic))
            .map(|e| e.callback.clone())
            .collect()
    }

    /// Callback registered under exactly this pattern, wildcards not applied.
    pub fn exact(&self, pattern: &str) -> Option<EventCallback> {
        let entries = self.entries.lock().expect("registry lock poisoned");
        entries
            .iter()
            .find(|e| e.pattern.raw() == pattern)
            .map(|e| e.callback.clone())
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.exact(pattern).is_some()
    }

    /// Registered patterns, in registration order.
    pub fn patterns(&self) -> Vec<String> {
        let entries = self.entries.lock().expect("registry lock poisoned");
        entries.iter().map(|e| e.pattern.raw().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_callback(counter: Arc<AtomicUsize>) -> EventCallback {
        callback(move |_topic, _body| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn wildcard_patterns_match_inbound_topics() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register(
            TopicPattern::compile("orders/+/created").unwrap(),
            counting_callback(hits.clone()),
        );

        let matched = registry.matching("orders/42/created");
        assert_eq!(matched.len(), 1);
        matched[0]("orders/42/created".to_string(), serde_json::json!({})).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.matching("orders/42/updated").is_empty());
    }

    #[test]
    fn register_replaces_existing_pattern() {
        let registry = SubscriptionRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let replaced = registry.register(
            TopicPattern::literal("monitoring"),
            counting_callback(first),
        );
        assert!(!replaced);
        let replaced = registry.register(
            TopicPattern::literal("monitoring"),
            counting_callback(second),
        );
        assert!(replaced);
        assert_eq!(registry.patterns(), vec!["monitoring".to_string()]);
    }

    #[test]
    fn unregister_is_a_noop_when_absent() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.unregister("missing"));
        registry.register(
            TopicPattern::literal("a"),
            callback(|_, _| async {}),
        );
        assert!(registry.unregister("a"));
        assert!(registry.patterns().is_empty());
    }

    #[test]
    fn exact_lookup_ignores_wildcard_semantics() {
        let registry = SubscriptionRegistry::new();
        registry.register(
            TopicPattern::compile("a/+/c").unwrap(),
            callback(|_, _| async {}),
        );
        assert!(registry.exact("a/+/c").is_some());
        assert!(registry.exact("a/b/c").is_none());
    }
}
