use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error};

use super::claims::{Claims, TokenType};
use crate::config::EngineConfig;
use crate::error::Error;

/// Signing algorithms the codec knows how to produce.
///
/// Anything else named in a token header, `none` included, fails to parse and
/// is rejected before signature verification.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    HS256,
    HS384,
    HS512,
}

impl Algorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }

    const fn to_jwt(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::HS256 => jsonwebtoken::Algorithm::HS256,
            Self::HS384 => jsonwebtoken::Algorithm::HS384,
            Self::HS512 => jsonwebtoken::Algorithm::HS512,
        }
    }

    const fn from_jwt(algorithm: jsonwebtoken::Algorithm) -> Option<Self> {
        match algorithm {
            jsonwebtoken::Algorithm::HS256 => Some(Self::HS256),
            jsonwebtoken::Algorithm::HS384 => Some(Self::HS384),
            jsonwebtoken::Algorithm::HS512 => Some(Self::HS512),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(format!("unsupported algorithm: {other}")),
        }
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    allowed: Vec<Algorithm>,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: SecretString, algorithm: Algorithm, allowed: Vec<Algorithm>) -> Self {
        let key = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(algorithm.to_jwt());
        validation.algorithms = allowed.iter().copied().map(Algorithm::to_jwt).collect();
        validation.leeway = 0;
        // `exp` is checked against the engine clock in `decode`, strictly.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            algorithm,
            allowed,
            validation,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.jwt_secret().clone(),
            config.jwt_algorithm(),
            config.allowed_algorithms().to_vec(),
        )
    }

    /// Sign `claims` into a compact JWT.
    ///
    /// # Errors
    /// Returns `Error::InvalidToken` if the claims cannot be serialized.
    pub fn encode(&self, claims: &Claims) -> Result<String, Error> {
        let header = Header::new(self.algorithm.to_jwt());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).map_err(|err| {
            error!("Failed to sign token: {err}");
            Error::InvalidToken
        })
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    /// - `Error::InvalidToken` for malformed input, a header algorithm outside
    ///   the allow-list, a bad signature or a claim set without `type`.
    /// - `Error::ExpiredToken` once `exp <= now_unix_seconds`.
    pub fn decode(&self, token: &str, now_unix_seconds: i64) -> Result<Claims, Error> {
        // The allow-list is enforced on the header before any key is used.
        let header = jsonwebtoken::decode_header(token).map_err(|err| {
            debug!("Rejecting token header: {err}");
            Error::InvalidToken
        })?;
        let algorithm = Algorithm::from_jwt(header.alg).ok_or(Error::InvalidToken)?;
        if !self.allowed.contains(&algorithm) {
            debug!("Rejecting token signed with disallowed algorithm {algorithm}");
            return Err(Error::InvalidToken);
        }

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| {
                debug!("Rejecting token: {err}");
                Error::InvalidToken
            })?
            .claims;

        if claims.jti.is_empty() || claims.sub.is_empty() {
            return Err(Error::InvalidToken);
        }
        if claims.exp <= now_unix_seconds {
            return Err(Error::ExpiredToken);
        }

        Ok(claims)
    }

    /// Decode and require a specific token type.
    ///
    /// # Errors
    /// Same as [`TokenCodec::decode`], plus `Error::TokenTypeMismatch`.
    pub fn decode_expecting(
        &self,
        token: &str,
        expected: TokenType,
        now_unix_seconds: i64,
    ) -> Result<Claims, Error> {
        let claims = self.decode(token, now_unix_seconds)?;
        if claims.token_type != expected {
            return Err(Error::TokenTypeMismatch);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Role;
    use anyhow::Result;
    use base64ct::{Base64UrlUnpadded, Encoding};
    use serde_json::json;

    const SECRET: &str = "k3P9vQz7Lm2Xw8Rt5Yb1Nc6Hd4Jf0Gs9Ea7Uo3Ii";
    const NOW: i64 = 1_700_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            SecretString::from(SECRET.to_string()),
            Algorithm::HS256,
            vec![Algorithm::HS256],
        )
    }

    fn claims(token_type: TokenType) -> Claims {
        Claims {
            sub: "user-1".to_string(),
            token_type,
            jti: "jti-1".to_string(),
            iat: NOW,
            exp: NOW + 900,
            role: Some(Role::User),
            fingerprint: None,
            auth_method: None,
        }
    }

    fn forge(header_json: &str, claims_json: &str, signature: &[u8]) -> String {
        format!(
            "{}.{}.{}",
            Base64UrlUnpadded::encode_string(header_json.as_bytes()),
            Base64UrlUnpadded::encode_string(claims_json.as_bytes()),
            Base64UrlUnpadded::encode_string(signature)
        )
    }

    #[test]
    fn encode_then_decode() -> Result<()> {
        let codec = codec();
        let token = codec.encode(&claims(TokenType::Access))?;
        assert_eq!(token.split('.').count(), 3);
        let decoded = codec.decode(&token, NOW)?;
        assert_eq!(decoded, claims(TokenType::Access));
        Ok(())
    }

    #[test]
    fn rejects_expired_at_and_after_exp() -> Result<()> {
        let codec = codec();
        let token = codec.encode(&claims(TokenType::Access))?;
        assert!(codec.decode(&token, NOW + 899).is_ok());
        for epsilon in [0, 1, 60, 86_400] {
            assert_eq!(
                codec.decode(&token, NOW + 900 + epsilon),
                Err(Error::ExpiredToken)
            );
        }
        Ok(())
    }

    #[test]
    fn rejects_alg_none() -> Result<()> {
        let claims_json = serde_json::to_string(&claims(TokenType::Access))?;
        let token = forge(r#"{"alg":"none","typ":"JWT"}"#, &claims_json, b"");
        assert_eq!(codec().decode(&token, NOW), Err(Error::InvalidToken));
        Ok(())
    }

    #[test]
    fn rejects_algorithm_outside_allow_list() -> Result<()> {
        let signer = TokenCodec::new(
            SecretString::from(SECRET.to_string()),
            Algorithm::HS512,
            vec![Algorithm::HS512],
        );
        let token = signer.encode(&claims(TokenType::Access))?;
        // Same secret, valid signature, but HS512 is not allowed here.
        assert_eq!(codec().decode(&token, NOW), Err(Error::InvalidToken));
        Ok(())
    }

    #[test]
    fn rejects_tampered_claims() -> Result<()> {
        let codec = codec();
        let token = codec.encode(&claims(TokenType::Access))?;
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut elevated = claims(TokenType::Access);
        elevated.role = Some(Role::SuperAdmin);
        parts[1] = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&elevated)?);
        assert_eq!(codec.decode(&parts.join("."), NOW), Err(Error::InvalidToken));
        Ok(())
    }

    #[test]
    fn rejects_wrong_secret() -> Result<()> {
        let token = codec().encode(&claims(TokenType::Access))?;
        let other = TokenCodec::new(
            SecretString::from("another-secret-another-secret-another".to_string()),
            Algorithm::HS256,
            vec![Algorithm::HS256],
        );
        assert_eq!(other.decode(&token, NOW), Err(Error::InvalidToken));
        Ok(())
    }

    #[test]
    fn rejects_claims_without_type() -> Result<()> {
        let body = json!({ "sub": "1", "jti": "j", "iat": NOW, "exp": NOW + 60 });
        let token = jsonwebtoken::encode(
            &Header::new(jsonwebtoken::Algorithm::HS256),
            &body,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )?;
        assert_eq!(codec().decode(&token, NOW), Err(Error::InvalidToken));
        Ok(())
    }

    #[test]
    fn rejects_asymmetric_header_algorithm() -> Result<()> {
        let claims_json = serde_json::to_string(&claims(TokenType::Access))?;
        let token = forge(r#"{"alg":"RS256","typ":"JWT"}"#, &claims_json, b"sig");
        assert_eq!(codec().decode(&token, NOW), Err(Error::InvalidToken));
        Ok(())
    }

    #[test]
    fn rejects_claims_without_exp() -> Result<()> {
        let body = json!({ "sub": "1", "jti": "j", "iat": NOW, "type": "access" });
        let token = jsonwebtoken::encode(
            &Header::new(jsonwebtoken::Algorithm::HS256),
            &body,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )?;
        assert_eq!(codec().decode(&token, NOW), Err(Error::InvalidToken));
        Ok(())
    }

    #[test]
    fn rejects_malformed_input() {
        let codec = codec();
        for token in ["", "a", "a.b", "a.b.c.d", "!!.??.##"] {
            assert_eq!(codec.decode(token, NOW), Err(Error::InvalidToken));
        }
    }

    #[test]
    fn decode_expecting_checks_type() -> Result<()> {
        let codec = codec();
        let refresh = codec.encode(&claims(TokenType::Refresh))?;
        assert_eq!(
            codec.decode_expecting(&refresh, TokenType::Access, NOW),
            Err(Error::TokenTypeMismatch)
        );
        assert!(codec
            .decode_expecting(&refresh, TokenType::Refresh, NOW)
            .is_ok());
        Ok(())
    }

    #[test]
    fn debug_does_not_print_secret() {
        let rendered = format!("{:?}", codec());
        assert!(!rendered.contains(SECRET));
    }
}
