use serde::{Deserialize, Serialize};

/// The authenticated caller, extracted from validated JWT claims and
/// attached to the exchange for downstream stages and handlers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    /// Subject claim (`sub`).
    pub user_id: String,
    pub username: String,
    pub role: String,
    /// Server-side session bound to the token (`sid`), if any.
    pub session_id: Option<String>,
}

impl Principal {
    pub fn from_claims(claims: &serde_json::Value) -> Self {
        let text = |key: &str| {
            claims
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            user_id: text("sub").unwrap_or_default(),
            username: text("username")
                .or_else(|| text("name"))
                .unwrap_or_default(),
            role: text("role").unwrap_or_default(),
            session_id: text("sid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_standard_claims() {
        let claims = serde_json::json!({
            "sub": "user-42",
            "username": "alice",
            "role": "admin",
            "sid": "abc123",
        });
        let principal = Principal::from_claims(&claims);
        assert_eq!(principal.user_id, "user-42");
        assert_eq!(principal.username, "alice");
        assert_eq!(principal.role, "admin");
        assert_eq!(principal.session_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn falls_back_to_name_claim() {
        let claims = serde_json::json!({ "sub": "u", "name": "Bob" });
        let principal = Principal::from_claims(&claims);
        assert_eq!(principal.username, "Bob");
        assert!(principal.session_id.is_none());
    }
}
