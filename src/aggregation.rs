//! Bounded, time-ordered sample history fed by the collectors.

pub mod aggregation_store;
pub mod sample_series;

pub use aggregation_store::AggregationStore;
