use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[default]
    Customer,
    Professional,
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Customer => write!(f, "Customer"),
            UserRole::Professional => write!(f, "Professional"),
            UserRole::Admin => write!(f, "Admin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
}

/// The currently authenticated principal.
///
/// Only `id`, `email` and `name` are required on the wire; everything else
/// falls back to a default so partial profile payloads still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl User {
    /// Build a user from the minimal identity fields.
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            phone: None,
            role: UserRole::default(),
            profile_image_url: None,
            avatar: None,
            addresses: Vec::new(),
            is_email_verified: false,
            is_active: true,
            created_at: None,
            updated_at: None,
            last_login_at: None,
        }
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }

    /// Avatar to show for this user, preferring the uploaded profile image.
    pub fn display_image(&self) -> Option<&str> {
        self.profile_image_url
            .as_deref()
            .or(self.avatar.as_deref())
    }

    /// The address marked as default, or the first one on file
    pub fn default_address(&self) -> Option<&Address> {
        self.addresses
            .iter()
            .find(|a| a.is_default == Some(true))
            .or_else(|| self.addresses.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_profile_decodes_with_defaults() {
        let json = r#"{"id":"u1","email":"a@b.com","name":"A"}"#;
        let user: User = serde_json::from_str(json).expect("minimal profile should parse");

        assert_eq!(user, User::new("u1", "a@b.com", "A"));
        assert_eq!(user.role, UserRole::Customer);
        assert!(user.is_active);
        assert!(user.addresses.is_empty());
    }

    #[test]
    fn test_full_profile_decodes_camel_case() {
        let json = r#"{
            "id": "p7",
            "email": "pro@example.com",
            "name": "Pat Pro",
            "phone": "555-0100",
            "role": "PROFESSIONAL",
            "profileImageUrl": "https://cdn.example.com/p7.png",
            "isEmailVerified": true,
            "isActive": false,
            "createdAt": "2024-03-01T10:00:00Z",
            "addresses": [
                {"street": "1 Main St", "city": "Springfield", "state": "IL",
                 "postalCode": "62701", "country": "US"},
                {"street": "9 Elm St", "city": "Springfield", "state": "IL",
                 "postalCode": "62702", "country": "US", "isDefault": true}
            ]
        }"#;
        let user: User = serde_json::from_str(json).expect("full profile should parse");

        assert_eq!(user.role, UserRole::Professional);
        assert!(user.is_email_verified);
        assert!(!user.is_active);
        assert!(user.created_at.is_some());
        assert_eq!(user.display_image(), Some("https://cdn.example.com/p7.png"));
        assert_eq!(user.default_address().map(|a| a.street.as_str()), Some("9 Elm St"));
    }

    #[test]
    fn test_display_image_falls_back_to_avatar() {
        let mut user = User::new("u1", "a@b.com", "A");
        assert_eq!(user.display_image(), None);

        user.avatar = Some("avatar.png".to_string());
        assert_eq!(user.display_image(), Some("avatar.png"));
    }

    #[test]
    fn test_role_serializes_screaming_case() {
        let json = serde_json::to_string(&UserRole::Admin).expect("role should serialize");
        assert_eq!(json, "\"ADMIN\"");
    }
}
