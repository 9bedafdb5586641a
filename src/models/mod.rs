mod location;
pub mod message;

pub use location::{Coordinates, LocationRecord, MatchedUser, NearbyPresence, PresenceEntry};
pub use message::{Action, WsMessage};
