use crate::data_capture::types::Sample;

/// Capacity-bounded history of samples, kept sorted by `window_end`.
#[derive(Debug, Default)]
pub struct SampleSeries {
    samples: Vec<Sample>,
    capacity: usize,
}

impl SampleSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Merges a harvested batch.
    ///
    /// A batch larger than the whole capacity replaces the history with its
    /// most recent `capacity` entries. Otherwise, when appending would
    /// overflow, the oldest entries are evicted in one go, at least half the
    /// capacity at a time.
    pub fn merge(&mut self, mut batch: Vec<Sample>) {
        if batch.is_empty() {
            return;
        }
        batch.sort_by_key(|s| s.window_end);

        if batch.len() > self.capacity {
            let keep_from = batch.len() - self.capacity;
            self.samples = batch.split_off(keep_from);
            return;
        }

        let overflow = (self.samples.len() + batch.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            let evict = overflow.max(self.capacity / 2).min(self.samples.len());
            self.samples.drain(..evict);
        }
        self.samples.extend(batch);
        // stable, so same-instant samples keep arrival order
        self.samples.sort_by_key(|s| s.window_end);
    }

    /// Samples with `start <= window_end < end`. An `end` of zero or less
    /// means through the newest sample.
    pub fn search(&self, start: i64, end: i64) -> &[Sample] {
        let from = self.samples.partition_point(|s| s.window_end < start);
        let to = if end > 0 {
            self.samples.partition_point(|s| s.window_end < end)
        } else {
            self.samples.len()
        };
        if from >= to {
            return &[];
        }
        &self.samples[from..to]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
