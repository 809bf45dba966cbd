use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The authenticated user's profile.
///
/// Fields other than `id`, `name` and `email` are kept as opaque JSON so
/// that profile data the client does not know about survives round-trips.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Name for display, falling back to the email address
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_keeps_unknown_fields() {
        let user: User = serde_json::from_str(
            r#"{"id": 7, "name": "Ada", "email": "ada@example.com", "role": "reader"}"#,
        )
        .unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.extra.get("role"), Some(&Value::from("reader")));
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user: User = serde_json::from_str(r#"{"id": 1, "email": "x@example.com"}"#).unwrap();
        assert_eq!(user.display_name(), "x@example.com");
    }
}
