use serde::{Deserialize, Serialize};

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// Issuer - optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// User email - optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// User role - optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}
