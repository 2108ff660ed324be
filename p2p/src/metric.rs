//! Per-connection message counters.
//!
//! Each peer owns two pools, one for traffic it sent and one for traffic it
//! received.  Counters are relaxed atomics; a disabled pool ignores every
//! update so the hot path stays a single branch.

use {
    crate::protocol::MessageKind,
    std::{
        collections::BTreeMap,
        sync::atomic::{AtomicU64, Ordering},
    },
};

const KIND_COUNT: usize = MessageKind::ALL.len();

/// Message and byte counters for one direction of one connection.
pub struct MetricPool {
    enabled: bool,
    messages: [AtomicU64; KIND_COUNT],
    bytes: AtomicU64,
    /// Messages that never reached the wire because a bounded queue was full.
    dropped: AtomicU64,
}

/// Point-in-time copy of a [`MetricPool`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricSnapshot {
    /// Message count per kind; kinds never seen are omitted.
    pub messages: BTreeMap<&'static str, u64>,
    pub bytes: u64,
    pub dropped: u64,
}

impl MetricSnapshot {
    pub fn total_messages(&self) -> u64 {
        self.messages.values().fold(0u64, |acc, n| acc.saturating_add(*n))
    }
}

impl MetricPool {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            messages: std::array::from_fn(|_| AtomicU64::new(0)),
            bytes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count one message of `kind` carrying `size` payload bytes.
    pub fn record(&self, kind: MessageKind, size: usize) {
        if !self.enabled {
            return;
        }
        if let Some(index) = MessageKind::ALL.iter().position(|k| *k == kind) {
            self.messages[index].fetch_add(1, Ordering::Relaxed);
        }
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Count a message dropped on a full queue.
    pub fn record_drop(&self) {
        if self.enabled {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        let messages = MessageKind::ALL
            .iter()
            .zip(self.messages.iter())
            .filter_map(|(kind, count)| match count.load(Ordering::Relaxed) {
                0 => None,
                n => Some((kind.name(), n)),
            })
            .collect();
        MetricSnapshot {
            messages,
            bytes: self.bytes.load(Ordering::Relaxed),
            dropped: self.dropped(),
        }
    }
}
