use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TagCount {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExtractTagsRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
}
