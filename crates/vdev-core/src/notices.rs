// ── Sticky notices ──
//
// Persistent, user-visible problems keyed by (device, topic). A notice
// stays until the same key is cleared or overwritten; transient failures
// never land here.

use dashmap::DashMap;

/// Topic for door controller addressing and reachability problems.
pub const CONTROLLER_TOPIC: &str = "controller";

#[derive(Debug, Default)]
pub struct Notices {
    entries: DashMap<(String, &'static str), String>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, device: &str, topic: &'static str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(device, topic, %message, "notice raised");
        self.entries.insert((device.to_owned(), topic), message);
    }

    pub fn clear(&self, device: &str, topic: &'static str) {
        if self.entries.remove(&(device.to_owned(), topic)).is_some() {
            tracing::info!(device, topic, "notice cleared");
        }
    }

    pub fn get(&self, device: &str, topic: &'static str) -> Option<String> {
        self.entries
            .get(&(device.to_owned(), topic))
            .map(|e| e.value().clone())
    }

    /// All notices as `(device, topic, message)`, sorted.
    pub fn all(&self) -> Vec<(String, &'static str, String)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().0.clone(), e.key().1, e.value().clone()))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_stick_until_cleared() {
        let notices = Notices::new();
        notices.set("garage", CONTROLLER_TOPIC, "address error: nope");
        assert_eq!(
            notices.get("garage", CONTROLLER_TOPIC).as_deref(),
            Some("address error: nope")
        );
        assert_eq!(notices.all().len(), 1);

        notices.clear("garage", CONTROLLER_TOPIC);
        assert!(notices.get("garage", CONTROLLER_TOPIC).is_none());
    }
}
