pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, PollingConfig};
pub use error::{InvalidVoteReason, SelectionError, SessionError, ValidationError};
pub use types::*;
