// Server Module
// Mounts the auth engine inside an axum application and reads sessions for host pages

pub mod engine;
pub mod handler;
pub mod session;

pub use engine::{AuthEngine, RemoteEngine};
pub use handler::{AuthHandler, Dispatch, auth_middleware};
pub use session::{Session, action_url, get_session, public_base};
