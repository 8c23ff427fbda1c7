use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mention {
    pub post_id: i64,
    pub mentioned_profile_id: i64,
    pub nickname: String,
}
