use super::events::Event;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Most-recent-first event log shared between the session and the console.
///
/// Every insertion takes the lock once, so readers never observe a
/// half-applied update.
#[derive(Clone, Default)]
pub struct EventHistory {
    entries: Arc<Mutex<VecDeque<Event>>>,
    limit: usize,
}

impl EventHistory {
    /// `limit == 0` keeps every event
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            limit,
        }
    }

    /// Insert at the head, dropping the oldest entries past the limit
    pub fn prepend(&self, event: Event) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_front(event);
        if self.limit > 0 {
            entries.truncate(self.limit);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Event> {
        self.entries.lock().unwrap().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let history = EventHistory::new(0);
        history.prepend(Event::new("first"));
        history.prepend(Event::new("second"));

        let entries = history.snapshot();
        assert_eq!(entries[0].kind(), Some("second"));
        assert_eq!(entries[1].kind(), Some("first"));
        assert_eq!(history.latest().unwrap().kind(), Some("second"));
    }

    #[test]
    fn test_limit_drops_oldest() {
        let history = EventHistory::new(2);
        history.prepend(Event::new("a"));
        history.prepend(Event::new("b"));
        history.prepend(Event::new("c"));

        let kinds: Vec<_> = history
            .snapshot()
            .iter()
            .map(|e| e.kind().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["c", "b"]);
    }

    #[test]
    fn test_clones_share_entries() {
        let history = EventHistory::new(0);
        let view = history.clone();
        history.prepend(Event::new("a"));
        assert_eq!(view.len(), 1);
        view.clear();
        assert!(history.is_empty());
    }
}
