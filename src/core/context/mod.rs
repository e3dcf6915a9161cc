pub mod context_store;
pub mod models;
pub mod turn_archive;

pub use context_store::{ContextStore, SessionHandle};
pub use models::{ConversationTurn, Session, TurnOutcome};
pub use turn_archive::{ArchivedSession, TurnArchive};
