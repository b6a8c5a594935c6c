//! The capability every destination platform implements.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::{normalize_platform_code, PublishResult};

#[async_trait]
pub trait Publisher: Send {
    /// Short platform code used in the task queue (`tg`, `ig`, ...).
    fn code(&self) -> &'static str;

    /// Acquire long-lived resources. Any failure leaves the publisher not
    /// ready and is reported only through the returned flag.
    async fn connect(&mut self) -> bool;

    /// Attempt exactly one publish and resolve to one terminal result.
    async fn publish(&mut self, text: &str, image_path: Option<&Path>) -> PublishResult;

    /// Release resources. Safe when never connected and safe to repeat.
    async fn disconnect(&mut self);
}

/// Publishers keyed by their platform code.
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: BTreeMap<String, Box<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher under its own code, replacing any previous one.
    pub fn register(&mut self, publisher: Box<dyn Publisher>) {
        self.publishers
            .insert(publisher.code().to_string(), publisher);
    }

    pub fn with(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.register(publisher);
        self
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Box<dyn Publisher>> {
        self.publishers.get_mut(&normalize_platform_code(code))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.publishers.contains_key(&normalize_platform_code(code))
    }

    pub fn remove(&mut self, code: &str) -> Option<Box<dyn Publisher>> {
        self.publishers.remove(&normalize_platform_code(code))
    }

    pub fn codes(&self) -> Vec<String> {
        self.publishers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    pub async fn disconnect_all(&mut self) {
        for publisher in self.publishers.values_mut() {
            publisher.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Publisher for Noop {
        fn code(&self) -> &'static str {
            self.0
        }

        async fn connect(&mut self) -> bool {
            true
        }

        async fn publish(&mut self, _text: &str, _image_path: Option<&Path>) -> PublishResult {
            PublishResult::success("1")
        }

        async fn disconnect(&mut self) {}
    }

    #[test]
    fn test_lookup_normalises_codes() {
        let mut registry = PublisherRegistry::new()
            .with(Box::new(Noop("tg")))
            .with(Box::new(Noop("ig")));

        assert!(registry.contains(" TG"));
        assert!(registry.get_mut("Ig ").is_some());
        assert!(registry.get_mut("tt").is_none());
        assert_eq!(registry.codes(), vec!["ig".to_string(), "tg".to_string()]);

        assert!(registry.remove("ig").is_some());
        assert!(!registry.contains("ig"));
    }
}
