//! Shared data model and protocol pieces for murmur: the transcript, step
//! pairing, citation sources and their side-channel codec, wire types, and the
//! traits through which the server reaches the external agent.

pub mod agent;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod side_channel;
pub mod sources;
pub mod steps;
pub mod transcript;
pub mod wire;

pub use errors::AgentError;
pub use ids::{MessageId, SessionId, ThreadId};
pub use messages::{Message, Role, ToolCall};
pub use sources::{Source, SourceAttachment};
pub use steps::Step;
pub use transcript::Transcript;
