use std::collections::HashSet;
use std::fmt;

use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Deserializer, Serialize};

/// Token as returned by the managed identity endpoint.
///
/// The endpoint sends the numeric fields as JSON strings; numbers are accepted too.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub expires_in: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub expires_on: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub not_before: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub token_type: String,
}

impl Token {
    /// True for the zero value, i.e. nothing was filled in by the endpoint.
    pub fn is_zero(&self) -> bool {
        *self == Token::default()
    }

    /// Case-insensitive comparison of the access token strings.
    pub fn same_access_token(&self, other: &Token) -> bool {
        eq_fold(&self.access_token, &other.access_token)
    }

    /// Unverified view of the access token's claims, for log lines only.
    pub fn claims(&self) -> Option<TokenClaims> {
        TokenClaims::peek(&self.access_token)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_in", &self.expires_in)
            .field("expires_on", &self.expires_on)
            .field("not_before", &self.not_before)
            .field("resource", &self.resource)
            .field("token_type", &self.token_type)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

/// Unicode case-folding equality.
pub fn eq_fold(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
        Raw::Null(()) => String::new(),
    })
}

/// Identity-related claims of an Entra ID access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub appid: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
}

impl TokenClaims {
    /// Decodes the payload without checking the signature, expiry or audience.
    /// Returns `None` when the token is not a JWT.
    pub fn peek(token: &str) -> Option<TokenClaims> {
        let header = decode_header(token).ok()?;
        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .map(|data| data.claims)
    }
}

impl fmt::Display for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "aud={} iss={} oid={} appid={} exp={}",
            show(&self.aud),
            show(&self.iss),
            show(&self.oid),
            show(&self.appid),
            self.exp.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use proptest::prelude::*;

    fn token(access: &str) -> Token {
        Token {
            access_token: access.to_string(),
            ..Token::default()
        }
    }

    #[test]
    fn default_token_is_zero() {
        assert!(Token::default().is_zero());
        assert!(!token("eyJ0eXAi").is_zero());

        let only_expiry = Token {
            expires_on: "1506484173".into(),
            ..Token::default()
        };
        assert!(!only_expiry.is_zero());
    }

    #[test]
    fn parses_imds_response_with_string_numbers() {
        let body = r#"{
            "access_token": "eyJ0eXAi.payload.sig",
            "refresh_token": "",
            "expires_in": "3599",
            "expires_on": "1506484173",
            "not_before": "1506480273",
            "resource": "https://management.azure.com/",
            "token_type": "Bearer"
        }"#;
        let token: Token = serde_json::from_str(body).unwrap();
        assert_eq!(token.access_token, "eyJ0eXAi.payload.sig");
        assert_eq!(token.expires_in, "3599");
        assert_eq!(token.expires_on, "1506484173");
        assert_eq!(token.token_type, "Bearer");
        assert!(!token.is_zero());
    }

    #[test]
    fn parses_numeric_fields_and_empty_bodies() {
        let token: Token = serde_json::from_str(r#"{"expires_in": 3599, "not_before": null}"#).unwrap();
        assert_eq!(token.expires_in, "3599");
        assert_eq!(token.not_before, "");

        let empty: Token = serde_json::from_str("{}").unwrap();
        assert!(empty.is_zero());
    }

    #[test]
    fn debug_hides_secrets() {
        let t = Token {
            access_token: "super-secret".into(),
            refresh_token: "also-secret".into(),
            resource: "https://vault.azure.net".into(),
            ..Token::default()
        };
        let out = format!("{:?}", t);
        assert!(!out.contains("super-secret"));
        assert!(!out.contains("also-secret"));
        assert!(out.contains("<redacted>"));
        assert!(out.contains("https://vault.azure.net"));
    }

    #[test]
    fn peeks_claims_without_verifying() {
        let claims = TokenClaims {
            aud: Some("https://management.azure.com/".into()),
            iss: Some("https://sts.windows.net/tenant/".into()),
            oid: Some("0000-oid".into()),
            appid: Some("89f69b3d-5b41-4b14-afbf-18fd96104e14".into()),
            exp: Some(1),
        };
        let jwt = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"not-the-real-key")).unwrap();

        let peeked = token(&jwt).claims().unwrap();
        assert_eq!(peeked, claims);
        assert_eq!(
            peeked.to_string(),
            "aud=https://management.azure.com/ iss=https://sts.windows.net/tenant/ oid=0000-oid appid=89f69b3d-5b41-4b14-afbf-18fd96104e14 exp=1"
        );
    }

    #[test]
    fn opaque_tokens_have_no_claims() {
        assert!(token("opaque").claims().is_none());
        assert!(Token::default().claims().is_none());
    }

    proptest! {
        #[test]
        fn case_only_differences_match(s in "[A-Za-z0-9._-]{1,64}") {
            let a = token(&s);
            let b = token(&s.to_uppercase());
            let c = token(&s.to_lowercase());
            prop_assert!(a.same_access_token(&b));
            prop_assert!(b.same_access_token(&c));
        }

        #[test]
        fn different_strings_do_not_match(a in "[a-z0-9]{1,32}", b in "[a-z0-9]{1,32}") {
            prop_assume!(a != b);
            prop_assert!(!token(&a).same_access_token(&token(&b.to_uppercase())));
        }
    }
}
