//! Download progress shared between part workers and whoever renders it.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters. Each worker writes only its own slot; `total` is shared.
#[derive(Debug)]
pub struct DownloadProgress {
    per_part: Vec<AtomicU64>,
    total: AtomicU64,
    total_size: u64,
}

/// Point-in-time copy of [`DownloadProgress`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub per_part: Vec<u64>,
    pub total: u64,
    pub total_size: u64,
}

impl DownloadProgress {
    pub fn new(parts: usize, total_size: u64) -> Self {
        Self {
            per_part: (0..parts).map(|_| AtomicU64::new(0)).collect(),
            total: AtomicU64::new(0),
            total_size,
        }
    }

    pub fn record(&self, part: usize, bytes: u64) {
        if let Some(slot) = self.per_part.get(part) {
            slot.fetch_add(bytes, Ordering::Relaxed);
            self.total.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn part(&self, part: usize) -> u64 {
        self.per_part
            .get(part)
            .map(|s| s.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            per_part: self
                .per_part
                .iter()
                .map(|s| s.load(Ordering::Relaxed))
                .collect(),
            total: self.total(),
            total_size: self.total_size,
        }
    }
}

impl ProgressSnapshot {
    pub fn fraction(&self) -> f64 {
        if self.total_size == 0 {
            1.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let fraction = self.total as f64 / self.total_size as f64;
            fraction
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total >= self.total_size
    }
}
