//! Thread conditions: the uniform wait/notify abstraction.
//!
//! Every place a thread can block (pipe I/O, socket accept, reverse-FD
//! round trips, clocks, process termination, userspace locks) is expressed as
//! waiting on one or more `Signaler`s through `Condition`s collected in a
//! `Waiter`.

mod condition;
mod cv;
pub mod lockword;

pub use condition::{Condition, ConditionData, ReadyResult, Signaler, Waiter};
pub use cv::Cv;
