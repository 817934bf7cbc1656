//! SNMP polling for cached devices.
//!
//! [`check::Poller`] is the entry point for one check invocation. Elected
//! (live) checks decide whether the cached frequency group is still fresh
//! ([`validity`]); when it is not, [`walk::ProtocolEngine`] resolves pending
//! instance mappings ([`mapping`]) and harvests metric values over several
//! GETBULK/GETNEXT rounds through an [`transport::SnmpTransport`]. Results
//! are rendered from the cache by [`output`].

pub mod check;
pub mod error;
pub mod mapping;
pub mod output;
pub mod transport;
pub mod validity;
pub mod walk;
pub mod worker;
