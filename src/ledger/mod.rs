//! Bug ledger: records, the persistence port, its backends, and the
//! recorder/query services built on top.

pub mod memory;
pub mod model;
pub mod query;
pub mod recorder;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

#[cfg(test)]
mod test_support;
