mod handler;
mod model;

pub use handler::find_matches;
pub use model::{MatchQuery, MatchesResponse};
