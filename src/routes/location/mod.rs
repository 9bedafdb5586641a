mod handler;
mod session;

pub use handler::{location_socket, resolve_identity};
pub use session::{Session, SessionPhase, spawn_ttl_refresh};
