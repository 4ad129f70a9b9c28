//! HS256 session token verification

use anyhow::{Context, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use super::Claims;

/// Verifies HS256 session tokens
#[derive(Clone)]
pub struct JwtVerifier {
    decoding: DecodingKey,
    issuer: Option<String>,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<String>) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }

    /// Verify a token and return its claims
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let token_data =
            decode::<Claims>(token, &self.decoding, &validation).context("JWT validation failed")?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::session_token;

    #[test]
    fn issued_token_verifies() {
        let jwt = JwtVerifier::new("secret", Some("hexabid".to_string()));
        let token = session_token("secret", Some("hexabid"), "user-1", 60);

        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("bids@acme.in"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = session_token("secret", None, "user-1", 60);
        assert!(JwtVerifier::new("other", None).verify_token(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = session_token("secret", None, "user-1", -3600);
        assert!(JwtVerifier::new("secret", None).verify_token(&token).is_err());
    }

    #[test]
    fn issuer_mismatch_is_rejected() {
        let token = session_token("secret", Some("elsewhere"), "user-1", 60);
        let jwt = JwtVerifier::new("secret", Some("hexabid".to_string()));
        assert!(jwt.verify_token(&token).is_err());
    }
}
