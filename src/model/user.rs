use super::common::deserialize_string_or_default;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedProduct {
    #[serde(deserialize_with = "deserialize_string_or_default")]
    pub product_code: String,
    #[serde(default)]
    pub email_notification: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: String,
    #[serde(default)]
    pub saved_products: Vec<SavedProduct>,
}
