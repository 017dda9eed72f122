pub mod code;
pub mod consensus;
pub mod memory_store;
pub mod pg_store;
pub mod service;
pub mod store;
pub mod transitions;
pub mod views;

pub use consensus::{resolve, CandidateTally, ConsensusKind, ConsensusResult};
pub use memory_store::MemorySessionStore;
pub use pg_store::PgSessionStore;
pub use service::{CreatedSession, SessionService};
pub use store::{CasOutcome, SessionStore, Versioned};
pub use transitions::VoteReceipt;
pub use views::{FoodMethodTallies, FoodMethodTally, ParticipantProgress, SessionView, StatusView};
