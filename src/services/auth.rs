use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::identity::{OwnerId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Owner,
    Worker,
}

/// Bearer token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Owner(OwnerId),
    Worker(WorkerId),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token subject is empty")]
    EmptySubject,
}

/// Issues and verifies HS256 bearer tokens.
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenAuthority {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn issue(&self, subject: &str, role: Role, ttl: Duration) -> Result<String, AuthError> {
        let claims = Claims {
            sub: subject.to_string(),
            role,
            exp: (Utc::now() + ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::EmptySubject);
        }
        Ok(match claims.role {
            Role::Owner => Principal::Owner(OwnerId::new(claims.sub)),
            Role::Worker => Principal::Worker(WorkerId::new(claims.sub)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_role() {
        let authority = TokenAuthority::new("test-secret");
        let token = authority.issue("worker-7", Role::Worker, Duration::minutes(5)).unwrap();
        assert_eq!(
            authority.verify(&token).unwrap(),
            Principal::Worker(WorkerId::new("worker-7"))
        );
    }

    #[test]
    fn test_rejects_foreign_and_expired_tokens() {
        let authority = TokenAuthority::new("test-secret");
        let foreign = TokenAuthority::new("other-secret")
            .issue("alice", Role::Owner, Duration::minutes(5))
            .unwrap();
        assert!(authority.verify(&foreign).is_err());

        let expired = authority
            .issue("alice", Role::Owner, Duration::minutes(-10))
            .unwrap();
        assert!(authority.verify(&expired).is_err());

        assert!(authority.verify("not-a-token").is_err());
    }

    #[test]
    fn test_rejects_empty_subject() {
        let authority = TokenAuthority::new("test-secret");
        let token = authority.issue(" ", Role::Owner, Duration::minutes(5)).unwrap();
        assert!(matches!(authority.verify(&token), Err(AuthError::EmptySubject)));
    }
}
