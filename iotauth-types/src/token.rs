use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::key::KeyType;

/// A signed JWT string produced by the tokenizer (§4.1).
///
/// Wraps the compact `header.payload.signature` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token(String);

impl FromStr for Token {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.split('.').count() == 3 {
            Ok(Self(s.to_string()))
        } else {
            Err(ApiError::bad_request())
        }
    }
}

impl Token {
    #[must_use]
    pub fn new(raw: String) -> Self {
        Self(raw)
    }

    // Not using the ToString/Display trait to prevent accidental leaks
    // into log lines that format with `{}`.
    #[allow(clippy::inherent_to_string)]
    #[must_use]
    pub fn to_string(&self) -> String {
        self.0.clone()
    }
}

/// The JWT claim set carried by every issued [`Token`] (§4.1).
///
/// `chrono::DateTime<Utc>` is used throughout rather than `time::OffsetDateTime`
/// to stay consistent with the rest of this crate (`key::Key` uses the same
/// clock type); `jsonwebtoken` accepts either as long as the `serde` impl
/// round-trips through a numeric timestamp, which the custom module below
/// provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer, normally the auth service's configured `instance_id`.
    pub iss: String,
    /// Effective principal; may be a `domain_user` composite id (§4.5.5).
    pub sub: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds::option", skip_serializing_if = "Option::is_none", default)]
    pub exp: Option<DateTime<Utc>>,
    /// Present only for revocable key types (§3); mirrors `Key::id`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub jti: Option<String>,
    /// Ordinal of the issuing [`KeyType`], written as an integer per §4.1.
    #[serde(rename = "type")]
    pub key_type: KeyType,
    /// `Key::issuer` (§3): the user id that caused this key to be issued.
    /// Usually equal to `user`, but kept as its own claim since §8's
    /// round-trip property is checked field-by-field against the source `Key`.
    pub issuer: String,
    /// Originating user id, always present.
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain: Option<String>,
}

impl Claims {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => exp <= now,
            None => false,
        }
    }
}

/// The pair returned by login/refresh flows; `refresh_token` is absent when
/// the flow only mints an access token (e.g. a one-off Recovery/Invitation
/// exchange) per §3's "Token: `{accessToken, refreshToken?}`".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: Token,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub refresh_token: Option<Token>,
}

impl TokenPair {
    #[must_use]
    pub fn access_only(access_token: Token) -> Self {
        Self {
            access_token,
            refresh_token: None,
        }
    }

    #[must_use]
    pub fn with_refresh(access_token: Token, refresh_token: Token) -> Self {
        Self {
            access_token,
            refresh_token: Some(refresh_token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_round_trip_through_json() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let claims = Claims {
            iss: "iotauth".into(),
            sub: "u1".into(),
            iat: now,
            exp: Some(now + chrono::Duration::hours(1)),
            jti: Some("01H000000000000000000000".into()),
            key_type: KeyType::Refresh,
            issuer: "u1".into(),
            user: "u1".into(),
            domain: Some("d1".into()),
        };
        let json = serde_json::to_string(&claims).unwrap();
        let decoded: Claims = serde_json::from_str(&json).unwrap();
        assert_eq!(claims, decoded);
    }

    #[test]
    fn stateless_claims_omit_jti_and_exp() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let claims = Claims {
            iss: "iotauth".into(),
            sub: "u1".into(),
            iat: now,
            exp: None,
            jti: None,
            key_type: KeyType::Access,
            issuer: "u1".into(),
            user: "u1".into(),
            domain: None,
        };
        let json = serde_json::to_string(&claims).unwrap();
        assert!(!json.contains("jti"));
        assert!(!json.contains("exp"));
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let mut claims = Claims {
            iss: "iotauth".into(),
            sub: "u1".into(),
            iat: now,
            exp: Some(now - chrono::Duration::seconds(1)),
            jti: None,
            key_type: KeyType::Access,
            issuer: "u1".into(),
            user: "u1".into(),
            domain: None,
        };
        assert!(claims.is_expired(now));
        claims.exp = None;
        assert!(!claims.is_expired(now));
    }

    #[test]
    fn token_from_str_requires_three_segments() {
        assert!(Token::from_str("a.b.c").is_ok());
        assert!(Token::from_str("not-a-jwt").is_err());
    }
}
