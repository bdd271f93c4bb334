//! Test support for fanout: a shell-script job type, invokers that record or
//! inject failures, and filesystem fixtures.

mod fixtures;
mod job;
mod mock;

pub use fixtures::*;
pub use job::*;
pub use mock::*;
