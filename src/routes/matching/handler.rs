use axum::{
    extract::{Query, State},
    response::IntoResponse,
};

use super::model::{MatchQuery, MatchesResponse};
use crate::AppState;
use crate::error::AppError;
use crate::utils::{parse_user_id, success_to_api_response};

#[axum::debug_handler]
pub async fn find_matches(
    State(state): State<AppState>,
    Query(query): Query<MatchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_user_id(&query.user_id)?;
    let radius_km = state.config.clamp_radius(query.radius_km)?;

    let matches = state.matcher.find_matches(user_id, radius_km).await?;

    Ok(success_to_api_response(MatchesResponse {
        user_id: user_id.to_string(),
        radius_km,
        tolerance: state.matcher.tolerance(),
        matches,
    }))
}
