//! Client side of the chat protocol: sends the transcript, folds the reply
//! back into it (streamed tokens and citations, or paced step replay), and
//! keeps the thread branches hanging off assistant messages.

pub mod branch;
pub mod error;
pub mod pacer;
pub mod session;
pub mod threads;
pub mod transport;

pub use branch::{select_branch, thread_view};
pub use error::ClientError;
pub use pacer::{NoDelay, Pacer, RandomPacer};
pub use session::{ChatSession, SessionSnapshot, SessionUpdate};
pub use threads::{Thread, ThreadStore, DEFAULT_THREAD_ID};
pub use transport::{ChatReply, ChatTransport, HttpTransport, StreamReply};
