use serde::{Deserialize, Serialize};

use super::BookId;

/// An entry of the home page's recent reviews feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentReview {
    pub id: i64,
    #[serde(default)]
    pub book_id: Option<BookId>,
    #[serde(default)]
    pub book_title: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Server timestamp, passed through as sent
    #[serde(default)]
    pub created_at: Option<String>,
}
