pub mod context;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tools;
pub mod turns;

pub use errors::{GatewayError, SupervisorError};
pub use events::{EventPayload, StreamEvent};
pub use ids::SessionId;
pub use turns::{ConversationTurn, Role};
