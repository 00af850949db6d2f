use std::collections::HashSet;

use crate::types::TooltipSample;

/// Keeps the first sample seen for each "<county>, <state>" key, in discovery order.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    samples: Vec<TooltipSample>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the sample was new and kept
    pub fn offer(&mut self, sample: TooltipSample) -> bool {
        if !self.seen.insert(sample.key()) {
            return false;
        }
        self.samples.push(sample);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<TooltipSample> {
        self.samples
    }
}
