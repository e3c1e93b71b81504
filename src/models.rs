//! Record types of the food-ordering store.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::entity::{Entity, KeySpace};

fn numeric_id(id: i64) -> Option<String> {
    (id != 0).then(|| id.to_string())
}

fn text_id(id: &str) -> Option<String> {
    (!id.is_empty()).then(|| id.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Food {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: i64,
    pub sale: i64,
    pub popular: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<FoodImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoodImage {
    pub id: i64,
    pub url: String,
}

impl Entity for Food {
    const COLLECTION: &'static str = "food";

    fn id(&self) -> Option<String> {
        numeric_id(self.id)
    }

    fn set_id_if_missing(&mut self, key: &str) {
        if self.id == 0 {
            if let Ok(parsed) = key.parse() {
                self.id = parsed;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub created_at: i64,
}

impl Entity for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> Option<String> {
        text_id(&self.id)
    }

    fn set_id_if_missing(&mut self, key: &str) {
        if self.id.is_empty() {
            self.id = key.to_string();
        }
    }

    fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Feedback {
    pub id: String,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: i64,
}

impl Entity for Feedback {
    const COLLECTION: &'static str = "feedback";

    fn id(&self) -> Option<String> {
        text_id(&self.id)
    }

    fn set_id_if_missing(&mut self, key: &str) {
        if self.id.is_empty() {
            self.id = key.to_string();
        }
    }
}

/// A booking, stored under the account that placed it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Booking {
    pub id: i64,
    pub account_id: String,
    pub address: String,
    pub amount: i64,
    pub created_at: i64,
    pub foods: String,
    pub name: String,
    pub payment: i64,
    pub payment_method: String,
    pub phone: String,
}

impl Entity for Booking {
    const COLLECTION: &'static str = "booking";
    const KEY_SPACE: KeySpace = KeySpace::Nested;

    fn id(&self) -> Option<String> {
        numeric_id(self.id)
    }

    fn set_id_if_missing(&mut self, key: &str) {
        if self.id == 0 {
            if let Ok(parsed) = key.parse() {
                self.id = parsed;
            }
        }
    }

    fn owner(&self) -> Option<String> {
        text_id(&self.account_id)
    }

    fn set_owner(&mut self, owner: &str) {
        self.account_id = owner.to_string();
    }
}

/// Back-office permission level, stored as its ordinal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum AdminRole {
    #[default]
    Staff,
    SuperAdmin,
}

impl From<i64> for AdminRole {
    fn from(value: i64) -> Self {
        match value {
            1 => AdminRole::SuperAdmin,
            _ => AdminRole::Staff,
        }
    }
}

impl From<AdminRole> for i64 {
    fn from(role: AdminRole) -> Self {
        match role {
            AdminRole::Staff => 0,
            AdminRole::SuperAdmin => 1,
        }
    }
}

/// Accepts RFC 3339 or zone-less timestamps; anything else reads as unset
fn lenient_time<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::String(text)) = raw else {
        return Ok(None);
    };
    Ok(DateTime::parse_from_rfc3339(&text)
        .map(|time| time.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        }))
}

/// Back-office account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Admin {
    pub id: String,
    pub username: String,
    pub password_hash_base64: String,
    pub password_salt_base64: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: AdminRole,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(deserialize_with = "lenient_time", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "LastLoginAt",
        deserialize_with = "lenient_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "LockoutEnd",
        deserialize_with = "lenient_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub lockout_end: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub failed_login_attempts: i32,
}

impl Entity for Admin {
    const COLLECTION: &'static str = "adminAccounts";

    fn id(&self) -> Option<String> {
        text_id(&self.id)
    }

    fn set_id_if_missing(&mut self, key: &str) {
        if self.id.is_empty() {
            self.id = key.to_string();
        }
    }

    fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
