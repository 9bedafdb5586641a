pub mod friend;
pub mod location;
pub mod matching;
pub mod presence;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

/// 组装所有路由
pub fn create_router(state: AppState) -> Router {
    let location_routes = Router::new()
        .route("/location", get(location::location_socket))
        .route("/matches", get(matching::find_matches));

    let friend_routes = Router::new()
        .route("/friends", get(friend::list_friends))
        .route("/friends/add", post(friend::add_friend))
        .route("/friends/remove", post(friend::remove_friend));

    let presence_routes = Router::new()
        .route("/presence/sync", post(presence::sync_presence))
        .route("/health", get(presence::health));

    Router::new()
        .merge(location_routes)
        .merge(friend_routes)
        .merge(presence_routes)
        .with_state(state)
}
