//! Per-project queues of build output lines.
//!
//! The executor pushes every output line here and pollers (the message
//! endpoint) pop them one at a time. Queues live only in memory.
//!
//! Each queue is bounded. When a project nobody polls reaches the bound, the
//! oldest line is dropped; the first drop of an overflow logs a warning and
//! every drop is counted (see [`MessageHub::dropped`]).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::warn;

/// Maximum number of lines retained per project.
pub const DEFAULT_MAX_LINES: usize = 10_000;

#[derive(Debug, Default)]
struct ProjectQueue {
    lines: VecDeque<String>,
    /// Lines dropped since the hub was created.
    dropped: u64,
    /// Set while the queue sits at capacity; cleared once a line is taken.
    overflowing: bool,
}

#[derive(Debug)]
pub struct MessageHub {
    queues: Mutex<HashMap<String, ProjectQueue>>,
    max_lines: usize,
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_LINES)
    }

    pub fn with_capacity(max_lines: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            max_lines: max_lines.max(1),
        }
    }

    /// Append a line to the project's queue, creating the queue if needed.
    pub fn enqueue(&self, project: &str, line: impl Into<String>) {
        let mut queues = self.lock();
        let queue = queues.entry(project.to_string()).or_default();
        if queue.lines.len() >= self.max_lines {
            queue.lines.pop_front();
            queue.dropped += 1;
            if !queue.overflowing {
                queue.overflowing = true;
                warn!(
                    project = %project,
                    max_lines = self.max_lines,
                    "Build output queue full, dropping oldest lines until it is polled"
                );
            }
        }
        queue.lines.push_back(line.into());
    }

    /// Pop the oldest line, or `None` when nothing is queued.
    pub fn dequeue(&self, project: &str) -> Option<String> {
        let mut queues = self.lock();
        let queue = queues.get_mut(project)?;
        let line = queue.lines.pop_front()?;
        queue.overflowing = false;
        Some(line)
    }

    /// Take every queued line in order.
    pub fn drain(&self, project: &str) -> Vec<String> {
        let mut queues = self.lock();
        match queues.get_mut(project) {
            Some(queue) => {
                queue.overflowing = false;
                queue.lines.drain(..).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn pending(&self, project: &str) -> usize {
        self.lock().get(project).map_or(0, |q| q.lines.len())
    }

    /// Number of lines of `project` dropped because its queue was full.
    pub fn dropped(&self, project: &str) -> u64 {
        self.lock().get(project).map_or(0, |q| q.dropped)
    }

    // A panic while holding the lock cannot leave a queue half-updated, so a
    // poisoned map is still safe to use.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProjectQueue>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let hub = MessageHub::new();
        for i in 1..=5 {
            hub.enqueue("docs-a", format!("L{i}"));
        }
        let got: Vec<String> = std::iter::from_fn(|| hub.dequeue("docs-a")).collect();
        assert_eq!(got, vec!["L1", "L2", "L3", "L4", "L5"]);
        assert_eq!(hub.dequeue("docs-a"), None);
    }

    #[test]
    fn test_absent_queue_returns_none() {
        let hub = MessageHub::new();
        assert_eq!(hub.dequeue("nobody"), None);
        assert_eq!(hub.pending("nobody"), 0);
        assert!(hub.drain("nobody").is_empty());
    }

    #[test]
    fn test_queues_are_per_project() {
        let hub = MessageHub::new();
        hub.enqueue("a", "from a");
        hub.enqueue("b", "from b");
        assert_eq!(hub.dequeue("b").as_deref(), Some("from b"));
        assert_eq!(hub.pending("a"), 1);
    }

    #[test]
    fn test_drain_empties_queue() {
        let hub = MessageHub::new();
        hub.enqueue("a", "1");
        hub.enqueue("a", "2");
        assert_eq!(hub.drain("a"), vec!["1", "2"]);
        assert_eq!(hub.pending("a"), 0);
    }

    #[test]
    fn test_capacity_drops_oldest_and_counts_drops() {
        let hub = MessageHub::with_capacity(2);
        hub.enqueue("a", "1");
        hub.enqueue("a", "2");
        assert_eq!(hub.dropped("a"), 0);
        hub.enqueue("a", "3");
        hub.enqueue("a", "4");
        assert_eq!(hub.dropped("a"), 2);
        assert_eq!(hub.drain("a"), vec!["3", "4"]);

        hub.enqueue("a", "5");
        assert_eq!(hub.dropped("a"), 2);
        assert_eq!(hub.dropped("b"), 0);
    }

    #[test]
    fn test_polling_below_capacity_loses_nothing() {
        let hub = MessageHub::with_capacity(3);
        let mut got = Vec::new();
        for i in 0..10 {
            hub.enqueue("a", format!("L{i}"));
            if i % 2 == 1 {
                got.extend(std::iter::from_fn(|| hub.dequeue("a")));
            }
        }
        let expected: Vec<String> = (0..10).map(|i| format!("L{i}")).collect();
        assert_eq!(got, expected);
        assert_eq!(hub.dropped("a"), 0);
    }

    #[test]
    fn test_concurrent_producers_keep_every_line() {
        let hub = Arc::new(MessageHub::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        hub.enqueue("p", format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let lines = hub.drain("p");
        assert_eq!(lines.len(), 400);
        // Per-producer order survives interleaving.
        for t in 0..4 {
            let mine: Vec<&String> = lines.iter().filter(|l| l.starts_with(&format!("{t}-"))).collect();
            let expected: Vec<String> = (0..100).map(|i| format!("{t}-{i}")).collect();
            assert_eq!(mine.into_iter().cloned().collect::<Vec<_>>(), expected);
        }
    }
}
