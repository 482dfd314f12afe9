//! Deterministic replicated state machine core.
//!
//! A user data model plus a table of named commands becomes a replicated
//! service: writes are batched into log entries and applied in order on
//! every replica, a leader-driven `tick` keeps a replicated clock and random
//! seed moving, and reads are gated by a configurable consistency policy.
//!
//! Entry point is [`NodeBuilder`].

mod cluster;
mod config;
mod consensus;
mod constants;
mod errors;
mod machine;
pub mod metrics;
mod node;
mod pipeline;
mod reads;
mod snapshot;
mod storage;
mod system;
mod ticker;
pub mod utils;

pub use cluster::*;
pub use config::*;
pub use consensus::*;
pub use constants::*;
pub use errors::*;
pub use machine::*;
pub use node::*;
pub use pipeline::*;
pub use reads::*;
pub use snapshot::*;
pub use storage::*;
pub use system::*;
pub use ticker::*;
pub use utils::*;

#[cfg(test)]
pub mod test_utils;
