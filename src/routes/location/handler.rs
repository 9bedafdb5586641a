use axum::{
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header::AUTHORIZATION},
    response::Response,
};
use futures_util::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

use super::session::Session;
use crate::AppState;
use crate::config::Config;
use crate::error::AppError;
use crate::utils::verify_token;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// 确定连接身份。
/// 配置了密钥且带了令牌时令牌必须有效；没有令牌则分配一个随机匿名ID。
pub fn resolve_identity(config: &Config, token: Option<&str>) -> Result<Uuid, AppError> {
    let token = token.map(str::trim).filter(|t| !t.is_empty());

    match (token, config.jwt_secret.as_deref()) {
        (Some(token), Some(secret)) => verify_token(token, secret),
        (Some(_), None) => {
            tracing::warn!("Token supplied but JWT_SECRET is not configured, connecting anonymously");
            Ok(Uuid::new_v4())
        }
        (None, _) => Ok(Uuid::new_v4()),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn location_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers).or(query.token.as_deref());
    let user_id = resolve_identity(&state.config, token)?;

    tracing::info!(user_id = %user_id, "Location socket upgrade");
    Ok(ws.on_upgrade(move |socket: WebSocket| async move {
        let (sink, stream) = socket.split();
        Session::new(user_id, &state).run(stream, sink).await;
    }))
}
