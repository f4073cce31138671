pub mod cookies;
mod entry_point;
mod error;
mod logout;
pub mod session_store;

pub use entry_point::SsoEntryPoint;
pub use error::{AuthError, ErrorInfo, ErrorResponse};
pub use logout::LogoutHandler;
pub use session_store::{MemorySessionStore, SessionError, SessionState, SessionStore};
