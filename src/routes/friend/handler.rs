use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::model::{FriendRequest, FriendsQuery, FriendsResponse};
use crate::AppState;
use crate::error::AppError;
use crate::utils::{parse_user_id, success_to_api_response};

#[axum::debug_handler]
pub async fn add_friend(
    State(state): State<AppState>,
    Json(req): Json<FriendRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_user_id(&req.user_id)?;
    let friend_id = parse_user_id(&req.friend_id)?;

    state.fanout.add_friend(user_id, friend_id).await?;
    tracing::info!(user_id = %user_id, friend_id = %friend_id, "Friend added");

    Ok((StatusCode::CREATED, success_to_api_response(())))
}

#[axum::debug_handler]
pub async fn remove_friend(
    State(state): State<AppState>,
    Json(req): Json<FriendRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_user_id(&req.user_id)?;
    let friend_id = parse_user_id(&req.friend_id)?;

    state.fanout.remove_friend(user_id, friend_id).await?;
    tracing::info!(user_id = %user_id, friend_id = %friend_id, "Friend removed");

    Ok(success_to_api_response(()))
}

#[axum::debug_handler]
pub async fn list_friends(
    State(state): State<AppState>,
    Query(query): Query<FriendsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = parse_user_id(&query.user_id)?;
    let friends = state.fanout.friends(user_id).await?;

    Ok(success_to_api_response(FriendsResponse {
        user_id: user_id.to_string(),
        friends: friends.iter().map(|id| id.to_string()).collect(),
    }))
}
