//! Command records and their durable store
//!
//! The store is the sole owner of command state. Every transition is a single
//! store operation; callers never hold a record beyond the call that reads it.

mod store;
mod types;

pub use store::CommandStore;
pub use types::{CommandRecord, CommandResult, CommandSummary};
