//! Assistant conversation session.
//!
//! # Module Structure
//!
//! - `store`: Conversation logs, the known set and the active pointer
//! - `generation`: Generation lifecycle (start, stream, stop, fail)
//! - `attachments`: Pending attachment batch and upload progress
//! - `typing`: Debounced typing indicator
//! - `orchestrator`: [`SessionOrchestrator`], the public entry point

mod attachments;
mod generation;
mod orchestrator;
mod store;
mod typing;

pub use attachments::{AttachmentManager, PendingFile};
pub use generation::{GenerationController, StartedGeneration};
pub use orchestrator::{SessionOrchestrator, SessionSnapshot};
pub use store::{ConversationStore, RemovedConversation};
pub use typing::{TypingCoordinator, TypingSink};
