//! Build execution: the per-invocation executor and the background pool.

pub mod executor;
pub mod pool;

pub use executor::{BuildExecutor, BuildOutcome, SUCCESS_SENTINEL, parse_sentinel};
pub use pool::{BuildId, BuildPool};
