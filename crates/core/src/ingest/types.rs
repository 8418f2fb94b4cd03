use crate::domain::rating::{Page, Rating};
use serde::{Deserialize, Serialize};

/// Wire shape of one listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingsPageResponse {
    pub items: Vec<Rating>,
    #[serde(default)]
    pub next_page: Option<String>,
}

impl From<RatingsPageResponse> for Page {
    fn from(resp: RatingsPageResponse) -> Self {
        Page {
            items: resp.items,
            next_page: resp.next_page.unwrap_or_default(),
        }
    }
}
