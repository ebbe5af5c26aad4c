//! Command dispatch layer.

pub mod mock;
pub mod process;
pub mod traits;

pub use mock::{MockDispatcher, MockResponse};
pub use process::ProcessDispatcher;
pub use traits::{
    CommandDispatcher, CommandOutput, CommandSpec, DEFAULT_QUERY_TIMEOUT, DispatchError,
    bound_timeout, classify,
};
