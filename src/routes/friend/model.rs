use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct FriendRequest {
    pub user_id: String,
    pub friend_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FriendsQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct FriendsResponse {
    pub user_id: String,
    pub friends: Vec<String>,
}
