//! Shared data model and pure computation for the snmpboost poller.
//!
//! The cached [`device::Device`] tree, OID helpers, the RPN evaluator used by
//! both metric post-calculation and triggers, and the metric value engine
//! all live here so that storage, polling and trigger crates agree on a
//! single representation.

pub mod datasource;
pub mod device;
pub mod id;
pub mod oid;
pub mod rpn;
pub mod types;
pub mod value;
