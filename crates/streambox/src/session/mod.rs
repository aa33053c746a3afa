//! Stream session controller.
//!
//! A session is one playback attempt for one [`PlaybackRequest`](crate::PlaybackRequest):
//!
//! ```text
//! Idle --start_session--> Buffering --sink playing--> Playing
//!                          |   ^                        |
//!                          |   +-------sink waiting-----+
//!                          +--watchdog--> TimedOut
//! Buffering | Playing --unrecoverable fault--> Error
//! any --stop_session--> Idle
//! ```

mod controller;
pub mod fault;
mod state;
pub mod watchdog;

pub use controller::SessionController;
pub use fault::{Fault, FaultClassifier, RecoveryAction};
pub use state::{FailureReason, RetryCounts, SessionEvent, SessionSnapshot, SessionStatus};
pub use watchdog::Watchdog;
