//! In-memory log history.
//!
//! The launcher keeps the most recent log output in a fixed-capacity ring so
//! front-ends can display it without re-reading log files. The ring is shared
//! between the logger chain and any number of observers, so all state lives
//! behind a single mutex.
//!
//! Listener callbacks run while the mutex is held. Listeners must not call
//! back into the history from inside a callback.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Kind of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Info,
    Warn,
    Error,
}

/// One captured log message.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub timestamp: SystemTime,
    pub kind: EntryKind,
    pub source: String,
    pub message: String,
}

impl HistoryEntry {
    fn new(kind: EntryKind, source: &str, message: &str) -> Self {
        HistoryEntry {
            timestamp: SystemTime::now(),
            kind,
            source: source.to_string(),
            // trailing newlines come from formatted engine output
            message: message.trim_end().to_string(),
        }
    }
}

/// Observer of history changes. Callbacks run under the history mutex.
pub trait HistoryListener: Send {
    /// An entry was appended.
    fn message_added(&self, entry: &HistoryEntry);

    /// The history was cleared.
    fn history_cleared(&self);
}

/// Token returned by [`LogHistory::add_listener`], used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct HistoryState {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
    listeners: Vec<(ListenerId, Box<dyn HistoryListener>)>,
    next_listener_id: u64,
    accept_info: bool,
    accept_warn: bool,
    accept_error: bool,
}

/// Thread-safe fixed-capacity ring of log entries with change listeners.
///
/// When the ring is full the oldest entry is dropped. Per-kind accept flags
/// can suppress entries at add time.
pub struct LogHistory {
    state: Mutex<HistoryState>,
}

/// Shared handle to a [`LogHistory`].
pub type SharedHistory = Arc<LogHistory>;

impl LogHistory {
    /// Create a history holding at most `capacity` entries.
    pub fn new(capacity: usize) -> SharedHistory {
        Arc::new(LogHistory {
            state: Mutex::new(HistoryState {
                capacity,
                entries: VecDeque::with_capacity(capacity),
                listeners: Vec::new(),
                next_listener_id: 0,
                accept_info: true,
                accept_warn: true,
                accept_error: true,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        // a poisoned history only means a listener panicked; the entries
        // themselves are still consistent
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Copy of the entry at `index`, oldest first. `None` if out of range.
    pub fn entry_at(&self, index: usize) -> Option<HistoryEntry> {
        self.lock().entries.get(index).cloned()
    }

    /// Copy of all retained entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Change the capacity. Existing entries are discarded.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.lock();
        state.capacity = capacity;
        state.entries.clear();
        state.entries.shrink_to(capacity);
        notify_cleared(&state);
    }

    /// Choose which entry kinds are retained.
    pub fn set_accepted_kinds(&self, info: bool, warn: bool, error: bool) {
        let mut state = self.lock();
        state.accept_info = info;
        state.accept_warn = warn;
        state.accept_error = error;
    }

    /// Append an entry, dropping the oldest one when full. Listeners are
    /// notified while the lock is held.
    pub fn add_entry(&self, kind: EntryKind, source: &str, message: &str) {
        let mut state = self.lock();
        let accepted = match kind {
            EntryKind::Info => state.accept_info,
            EntryKind::Warn => state.accept_warn,
            EntryKind::Error => state.accept_error,
        };
        if !accepted || state.capacity == 0 {
            return;
        }

        if state.entries.len() == state.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(HistoryEntry::new(kind, source, message));

        let entry = state.entries.back().cloned();
        if let Some(entry) = entry {
            for (_, listener) in &state.listeners {
                listener.message_added(&entry);
            }
        }
    }

    /// Drop all entries and notify listeners.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        notify_cleared(&state);
    }

    /// Register a listener. Returns a token for [`Self::remove_listener`].
    pub fn add_listener(&self, listener: Box<dyn HistoryListener>) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push((id, listener));
        id
    }

    /// Remove a previously registered listener. Unknown tokens are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut state = self.lock();
        state.listeners.retain(|(lid, _)| *lid != id);
    }
}

fn notify_cleared(state: &HistoryState) {
    for (_, listener) in &state.listeners {
        listener.history_cleared();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ring_drops_oldest() {
        let history = LogHistory::new(3);
        for i in 0..5 {
            history.add_entry(EntryKind::Info, "test", &format!("message {}", i));
        }

        // capacity 3, 5 additions: entries 2..5 remain
        assert_eq!(history.len(), 3);
        assert_eq!(history.entry_at(0).unwrap().message, "message 2");
        assert_eq!(history.entry_at(2).unwrap().message, "message 4");
        assert!(history.entry_at(3).is_none());
    }

    #[test]
    fn test_kind_filter_suppresses_entries() {
        let history = LogHistory::new(8);
        history.set_accepted_kinds(false, true, true);

        history.add_entry(EntryKind::Info, "test", "dropped");
        history.add_entry(EntryKind::Warn, "test", "kept");

        assert_eq!(history.len(), 1);
        assert_eq!(history.entry_at(0).unwrap().kind, EntryKind::Warn);
    }

    #[test]
    fn test_zero_capacity_accepts_nothing() {
        let history = LogHistory::new(0);
        history.add_entry(EntryKind::Error, "test", "ignored");
        assert!(history.is_empty());
    }

    struct CountingListener {
        added: Arc<AtomicUsize>,
        cleared: Arc<AtomicUsize>,
    }

    impl HistoryListener for CountingListener {
        fn message_added(&self, _entry: &HistoryEntry) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        fn history_cleared(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listener_notifications() {
        let history = LogHistory::new(4);
        let added = Arc::new(AtomicUsize::new(0));
        let cleared = Arc::new(AtomicUsize::new(0));

        let id = history.add_listener(Box::new(CountingListener {
            added: added.clone(),
            cleared: cleared.clone(),
        }));

        history.add_entry(EntryKind::Info, "test", "one");
        history.add_entry(EntryKind::Error, "test", "two");
        history.clear();

        assert_eq!(added.load(Ordering::SeqCst), 2);
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
        assert!(history.is_empty());

        history.remove_listener(id);
        history.add_entry(EntryKind::Info, "test", "three");
        assert_eq!(added.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_message_trailing_newline_is_trimmed() {
        let history = LogHistory::new(2);
        history.add_entry(EntryKind::Info, "test", "line\n");
        assert_eq!(history.entry_at(0).unwrap().message, "line");
    }
}
