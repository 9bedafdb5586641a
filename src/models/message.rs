use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{Coordinates, LocationRecord};
use crate::utils::validate_coordinates;

pub const ACTION_CREATE: &str = "create";
pub const ACTION_UPDATE: &str = "update";
pub const ACTION_UPDATE_DESTINATION: &str = "update_destination";
pub const ACTION_UPDATE_CURRENT_LOCATION: &str = "update_current_location";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_GET_LOCATION: &str = "get_location";
pub const ACTION_FRIEND_LOCATION: &str = "friend_location";

/// WebSocket 上双向传输的消息，字段名固定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WsMessage {
    pub fn from_record(action: &str, record: &LocationRecord) -> Self {
        Self {
            action: action.to_string(),
            user_id: Some(record.user_id.to_string()),
            current_latitude: Some(record.current_latitude),
            current_longitude: Some(record.current_longitude),
            destination_latitude: Some(record.destination_latitude),
            destination_longitude: Some(record.destination_longitude),
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
            error: None,
        }
    }

    pub fn error(action: &str, message: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    fn current(&self) -> AppResult<Coordinates> {
        pair(self.current_latitude, self.current_longitude, "current")
    }

    fn destination(&self) -> AppResult<Coordinates> {
        pair(
            self.destination_latitude,
            self.destination_longitude,
            "destination",
        )
    }
}

fn pair(latitude: Option<f64>, longitude: Option<f64>, which: &str) -> AppResult<Coordinates> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => {
            validate_coordinates(latitude, longitude)?;
            Ok(Coordinates::new(latitude, longitude))
        }
        _ => Err(AppError::validation(format!(
            "{}_latitude and {}_longitude are required",
            which, which
        ))),
    }
}

/// 客户端动作，未知动作保留原始名称以便兼容新版本客户端
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create {
        current: Coordinates,
        destination: Coordinates,
    },
    Update {
        current: Coordinates,
        destination: Coordinates,
    },
    UpdateDestination(Coordinates),
    UpdateCurrentLocation(Coordinates),
    Delete,
    GetLocation {
        user_id: Option<String>,
    },
    Unknown(String),
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::Create { .. } => ACTION_CREATE,
            Action::Update { .. } => ACTION_UPDATE,
            Action::UpdateDestination(_) => ACTION_UPDATE_DESTINATION,
            Action::UpdateCurrentLocation(_) => ACTION_UPDATE_CURRENT_LOCATION,
            Action::Delete => ACTION_DELETE,
            Action::GetLocation { .. } => ACTION_GET_LOCATION,
            Action::Unknown(name) => name,
        }
    }
}

impl TryFrom<&WsMessage> for Action {
    type Error = AppError;

    fn try_from(message: &WsMessage) -> AppResult<Self> {
        let action = match message.action.as_str() {
            ACTION_CREATE => Action::Create {
                current: message.current()?,
                destination: message.destination()?,
            },
            ACTION_UPDATE => Action::Update {
                current: message.current()?,
                destination: message.destination()?,
            },
            ACTION_UPDATE_DESTINATION => Action::UpdateDestination(message.destination()?),
            ACTION_UPDATE_CURRENT_LOCATION => Action::UpdateCurrentLocation(message.current()?),
            ACTION_DELETE => Action::Delete,
            ACTION_GET_LOCATION => Action::GetLocation {
                user_id: message
                    .user_id
                    .as_ref()
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty()),
            },
            other => Action::Unknown(other.to_string()),
        };
        Ok(action)
    }
}
