use serde::{Deserialize, Serialize};

use crate::models::MatchedUser;

#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    pub user_id: String,
    pub radius_km: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct MatchesResponse {
    pub user_id: String,
    pub radius_km: f64,
    pub tolerance: f64,
    pub matches: Vec<MatchedUser>,
}
