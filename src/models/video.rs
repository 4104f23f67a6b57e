use serde::{Deserialize, Serialize};

/// A video as known to the purchase core. Identity, ownership and price are
/// facts owned by the catalog; the core only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    /// None or non-positive means the video is not for sale
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub created_at: i64,
}

impl Video {
    pub fn valid_price(&self) -> Option<i64> {
        self.price_cents.filter(|cents| *cents > 0)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideo {
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}
