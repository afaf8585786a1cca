pub mod error;
pub mod registry;
pub mod runtime;
pub mod sessions;
pub mod tools;
pub mod truncate;
pub mod window;

pub use error::EngineError;
pub use registry::ToolRegistry;
pub use runtime::{AgentRuntime, RunOutput, RuntimeConfig};
pub use sessions::{ActiveSessions, SessionManager, SessionManagerConfig};
pub use window::ConversationWindow;
