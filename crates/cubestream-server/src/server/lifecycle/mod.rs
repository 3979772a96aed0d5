//! Start, supervise and stop the serving process.
//!
//! - [`supervisor`] - the orchestrating `select!` loop and its state machine.
//! - [`completion`] - the first-write-wins slot carrying the run outcome.
//! - [`interrupt`] - operator stop requests (OS signals, or a test trigger).

pub mod completion;
pub mod interrupt;
pub mod supervisor;
