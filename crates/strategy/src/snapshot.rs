//! Shared cross-instrument snapshot.
//!
//! Each driver publishes its latest formed readings after processing a bar.
//! Readers take a point-in-time view and never observe a torn update: writers
//! replace the whole map behind an `Arc`, readers clone the `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use common::{Error, Result};

/// One instrument's state as of one bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub close_time: DateTime<Utc>,
    pub close: f64,
    /// Primary value of every indicator cell; `None` until the pipeline is formed.
    pub values: Option<Vec<f64>>,
}

impl Reading {
    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.as_ref()?.get(index).copied()
    }
}

/// Latest and previous readings for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedValue {
    pub current: Reading,
    pub previous: Option<Reading>,
}

type Map = HashMap<String, PublishedValue>;

/// Writer side, cloned into every driver.
#[derive(Debug, Clone, Default)]
pub struct SharedSnapshot {
    inner: Arc<RwLock<Arc<Map>>>,
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new reading for `instrument`. The old current becomes previous.
    pub fn publish(&self, instrument: &str, reading: Reading) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Clones the map only if a reader still holds the old view.
        let map = Arc::make_mut(&mut *guard);
        match map.get_mut(instrument) {
            Some(entry) => {
                if entry.current.close_time == reading.close_time {
                    entry.current = reading;
                } else {
                    let old = std::mem::replace(&mut entry.current, reading);
                    entry.previous = Some(old);
                }
            }
            None => {
                map.insert(
                    instrument.to_string(),
                    PublishedValue {
                        current: reading,
                        previous: None,
                    },
                );
            }
        }
    }

    /// Point-in-time view across all instruments.
    pub fn view(&self) -> SnapshotView {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        SnapshotView(Arc::clone(&guard))
    }
}

/// Immutable view; later publishes do not affect it.
#[derive(Debug, Clone, Default)]
pub struct SnapshotView(Arc<Map>);

impl SnapshotView {
    pub fn get(&self, instrument: &str) -> Result<&PublishedValue> {
        self.0
            .get(instrument)
            .ok_or_else(|| Error::StaleSnapshot(instrument.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}
