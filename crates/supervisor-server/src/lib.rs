pub mod handlers;
pub mod multiplexer;
pub mod router;
pub mod server;
pub mod ws;

pub use router::{negotiate, resolve_session_id, validate_prompt, ResponseMode};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
