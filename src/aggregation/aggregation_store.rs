use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::sample_series::SampleSeries;
use crate::configuration::types::StoreConfig;
use crate::data_capture::collector::Collector;
use crate::data_capture::types::Sample;

/// Periodically harvests every collector into one bounded, time-ordered
/// series and answers range queries over it.
///
/// Harvests take the write lock for the whole export-and-merge step, so a
/// query (read lock) sees either none or all of a harvested batch.
pub struct AggregationStore {
    collectors: Vec<Arc<Collector>>,
    series: RwLock<SampleSeries>,
    harvest_interval: Duration,
    cancel: CancellationToken,
}

impl AggregationStore {
    pub fn new(collectors: Vec<Arc<Collector>>, config: &StoreConfig) -> Self {
        Self {
            collectors,
            series: RwLock::new(SampleSeries::new(config.capacity)),
            harvest_interval: Duration::from_secs(config.harvest_interval_secs.max(1)),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the harvest loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.harvest_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.harvest();
                    }
                }
            }
            debug!("harvest loop exited");
        });
        info!(
            "aggregation store started: {} collector(s), capacity {}, every {:?}",
            self.collectors.len(),
            self.series.read().capacity(),
            self.harvest_interval
        );
    }

    /// Halts harvesting and drops everything retained.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.series.write().clear();
        info!("aggregation store stopped");
    }

    /// Exports every collector and merges the result. Returns the number of
    /// samples harvested.
    pub fn harvest(&self) -> usize {
        let mut series = self.series.write();
        let batch: Vec<Sample> = self
            .collectors
            .iter()
            .flat_map(|c| c.export_and_reset())
            .collect();
        let harvested = batch.len();
        if harvested > 0 {
            series.merge(batch);
            debug!("harvested {} sample(s), {} retained", harvested, series.len());
        }
        harvested
    }

    /// Samples with `start <= window_end < end` (an `end` of zero or less is
    /// open-ended) that satisfy `predicate`, oldest first.
    pub fn query<P>(&self, predicate: P, start: i64, end: i64) -> Vec<Sample>
    where
        P: Fn(&Sample) -> bool,
    {
        self.series
            .read()
            .search(start, end)
            .iter()
            .filter(|s| predicate(s))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
