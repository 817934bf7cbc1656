//! Check election: among duplicate checks of one device and polling
//! interval, exactly one per period is marked live and polls the device;
//! the others answer from the cache.

pub mod election;

#[cfg(test)]
mod tests;

pub use election::{ElectionSummary, Elector, GroupKey, PendingCheck, SpreadMode, StateType};
