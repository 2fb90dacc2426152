pub mod demo;
pub mod http;
pub mod scripted;
pub mod sse;

pub use demo::{DemoAgent, StaticSources};
pub use http::HttpAgent;
pub use scripted::{ScriptedAgent, ScriptedRun};
