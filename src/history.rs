//! Sample history buffer.
//!
//! The device sends a rolling window of its most recent samples with every
//! status response, so consecutive windows overlap. Only samples newer than
//! the last one drawn are passed on to the renderer.

use crate::remote::Sample;
use std::collections::HashSet;

/// Filter a status window against the last seen id.
///
/// The window is walked newest-first. A sample is accepted when its id is
/// strictly greater than `last_seen_id` as it stood before the call, and it
/// is the first sample with that id in the window. Returns the new watermark
/// (the maximum of the old one and every id in the window) and the accepted
/// samples in their original relative order.
pub fn ingest(samples: &[Sample], last_seen_id: Option<i64>) -> (Option<i64>, Vec<Sample>) {
    let mut watermark = last_seen_id;
    let mut seen = HashSet::new();
    let mut accepted = Vec::new();

    for sample in samples.iter().rev() {
        watermark = Some(watermark.map_or(sample.id, |id| id.max(sample.id)));

        if last_seen_id.is_some_and(|last| sample.id <= last) {
            continue;
        }
        if seen.insert(sample.id) {
            accepted.push(*sample);
        }
    }

    accepted.reverse();
    (watermark, accepted)
}

/// Tracks the id of the newest sample handed to the renderer.
///
/// Rendering is incremental, so no sample data is retained.
#[derive(Debug, Default, Clone)]
pub struct SampleHistoryBuffer {
    last_seen_id: Option<i64>,
}

impl SampleHistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the newest sample seen so far, if any.
    pub fn last_seen_id(&self) -> Option<i64> {
        self.last_seen_id
    }

    /// Accept the unseen part of a status window and advance the watermark.
    pub fn ingest(&mut self, samples: &[Sample]) -> Vec<Sample> {
        let (watermark, accepted) = ingest(samples, self.last_seen_id);
        self.last_seen_id = watermark;
        accepted
    }
}
