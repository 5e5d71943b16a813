//! USOS user profile
//!
//! See `services/users/user` in the USOS API reference.

use serde::{Deserialize, Deserializer};

use crate::data::NewUser;

/// Fields requested from `services/users/user` on every login.
///
/// `student_programmes` is fetched but not yet stored.
pub const PROFILE_FIELDS: &[&str] = &[
    "id",
    "first_name",
    "last_name",
    "email",
    "student_number",
    "student_programmes",
];

/// Value of the `fields` query parameter
pub fn fields_param(fields: &[&str]) -> String {
    fields.join("|")
}

/// Profile data asserted by USOS for the signed-in user
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfileData {
    #[serde(deserialize_with = "deserialize_usos_id")]
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub student_number: Option<String>,
    #[serde(default)]
    pub student_programmes: serde_json::Value,
}

impl ProfileData {
    pub fn to_new_user(&self) -> NewUser {
        NewUser {
            usos_id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            student_number: self.student_number.clone(),
        }
    }
}

/// USOS sends user IDs as JSON strings; accept numbers too.
fn deserialize_usos_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid USOS user id: {text:?}"))),
    }
}
