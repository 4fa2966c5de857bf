//! Task executor implementations.

pub mod command;
pub mod mock;

pub use command::CommandExecutor;
pub use mock::{MockCall, MockExecutor};
