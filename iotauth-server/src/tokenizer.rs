use chrono::Utc;
use iotauth_types::key::Key;
use iotauth_types::token::{Claims, Token};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

/// Outcome of a failed [`Tokenizer::parse`], kept distinct from
/// [`iotauth_types::error::ErrorKind`] so call sites (Identify, §4.5.3) can
/// special-case expiry without string-matching an error message.
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    /// Carries the decoded key so `Identify` (§4.5.3) can still inspect its
    /// type and id to revoke an expired API key without re-parsing.
    #[error("token has expired")]
    Expired(Box<Key>),
    #[error("token issuer does not match")]
    WrongIssuer,
    #[error("token is malformed or has an invalid signature: {0}")]
    Invalid(String),
}

/// HMAC-SHA512 signs and parses the self-describing claims set of §4.1.
///
/// Grounded in `modkit-auth`'s `jsonwebtoken` wrapper for the codec, and in
/// the teacher's `Token` newtype (opaque, non-`Display`) for the signed
/// string's shape.
pub struct Tokenizer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl Tokenizer {
    #[must_use]
    pub fn new(secret: &[u8], issuer: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn issue(&self, key: &Key) -> Result<Token, jsonwebtoken::errors::Error> {
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: key.subject.clone(),
            iat: key.issued_at,
            exp: key.expires_at,
            jti: key.key_type.is_revocable().then(|| key.id.to_string()),
            key_type: key.key_type,
            issuer: key.issuer.clone(),
            user: key.user.clone(),
            domain: key.domain.clone(),
        };
        let header = Header::new(jsonwebtoken::Algorithm::HS512);
        let raw = jsonwebtoken::encode(&header, &claims, &self.encoding_key)?;
        Ok(Token::new(raw))
    }

    /// Validates signature and `iss`; expiry is checked explicitly so API
    /// keys (`exp = None`, never expiring) don't trip `jsonwebtoken`'s
    /// built-in expiry requirement.
    pub fn parse(&self, token: &Token) -> Result<Key, TokenizerError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS512);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Claims>(&token.to_string(), &self.decoding_key, &validation)
            .map_err(|err| TokenizerError::Invalid(err.to_string()))?;
        let claims = data.claims;

        if claims.iss != self.issuer {
            return Err(TokenizerError::WrongIssuer);
        }

        let id = claims
            .jti
            .as_deref()
            .map(|s| s.parse().unwrap_or_else(|_| ulid::Ulid::nil()))
            .unwrap_or_else(ulid::Ulid::nil);

        let key = Key {
            id,
            key_type: claims.key_type,
            issuer: claims.issuer,
            subject: claims.sub,
            user: claims.user,
            domain: claims.domain,
            issued_at: claims.iat,
            expires_at: claims.exp,
        };

        if key.is_expired(Utc::now()) {
            return Err(TokenizerError::Expired(Box::new(key)));
        }

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotauth_types::key::KeyType;

    fn key(key_type: KeyType, expires_in: Option<chrono::Duration>) -> Key {
        let now = Utc::now();
        Key::new(
            key_type,
            "u1".into(),
            String::new(),
            "u1".into(),
            None,
            now,
            expires_in.map(|d| now + d),
        )
    }

    #[test]
    fn round_trips_a_non_refresh_key() {
        let tokenizer = Tokenizer::new(b"secret", "iotauth".into());
        let k = key(KeyType::Access, Some(chrono::Duration::hours(1)));
        let token = tokenizer.issue(&k).unwrap();
        let parsed = tokenizer.parse(&token).unwrap();
        assert_eq!(parsed.key_type, k.key_type);
        assert_eq!(parsed.subject, k.subject);
        assert_eq!(parsed.issuer, k.issuer);
        assert_eq!(parsed.user, k.user);
        assert_eq!(parsed.domain, k.domain);
    }

    #[test]
    fn round_trip_preserves_issuer_distinct_from_user() {
        let tokenizer = Tokenizer::new(b"secret", "iotauth".into());
        let now = Utc::now();
        let k = Key::new(
            KeyType::Api,
            "admin1".into(),
            "u1".into(),
            "u1".into(),
            None,
            now,
            Some(now + chrono::Duration::hours(1)),
        );
        let token = tokenizer.issue(&k).unwrap();
        let parsed = tokenizer.parse(&token).unwrap();
        assert_eq!(parsed.issuer, "admin1");
        assert_eq!(parsed.user, "u1");
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokenizer = Tokenizer::new(b"secret", "iotauth".into());
        let k = key(KeyType::Access, Some(chrono::Duration::seconds(-1)));
        let token = tokenizer.issue(&k).unwrap();
        assert!(matches!(
            tokenizer.parse(&token),
            Err(TokenizerError::Expired(_))
        ));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let issuer_a = Tokenizer::new(b"secret", "iotauth-a".into());
        let issuer_b = Tokenizer::new(b"secret", "iotauth-b".into());
        let k = key(KeyType::Access, Some(chrono::Duration::hours(1)));
        let token = issuer_a.issue(&k).unwrap();
        assert!(matches!(
            issuer_b.parse(&token),
            Err(TokenizerError::WrongIssuer)
        ));
    }

    #[test]
    fn api_key_with_no_expiry_round_trips() {
        let tokenizer = Tokenizer::new(b"secret", "iotauth".into());
        let k = key(KeyType::Api, None);
        let token = tokenizer.issue(&k).unwrap();
        let parsed = tokenizer.parse(&token).unwrap();
        assert!(parsed.expires_at.is_none());
    }
}
