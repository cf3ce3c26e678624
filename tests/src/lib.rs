//! nimbus-os hosted test suite.
//!
//! Two kinds of tests live here:
//!
//! 1. Kernel modules with no hardware or allocator dependencies are included
//!    verbatim via `#[path]` and run under the host test harness, together
//!    with additional cases that go beyond their embedded unit tests.
//! 2. Semantic tests model a kernel data structure in a few lines and pin
//!    down the behavior the kernel implementation must match (buffer
//!    arithmetic, resolution rules, lock-word transitions).

#![allow(dead_code)]

// Pure kernel modules, compiled as-is.
#[path = "../../src/abi/errno.rs"]
pub mod errno;
#[path = "../../src/abi/rights.rs"]
pub mod rights;

#[path = "../../src/fd/reverse_proto.rs"]
pub mod reverse_proto;

mod lock_transitions;
mod path_rules;
mod pipe_buffer;
mod poll_composition;
mod protocol_stream;
