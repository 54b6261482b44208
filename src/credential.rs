use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::error::{LedgerError, LedgerResult};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const REQUIRED_FIELDS: [&str; 4] = ["type", "project_id", "private_key", "client_email"];
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Service-account key as issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn token_uri(&self) -> &str {
        self.token_uri
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TOKEN_URI)
    }
}

/// Fields from `REQUIRED_FIELDS` that are absent from a raw credential
/// document, in declaration order.
pub fn missing_fields(raw: &Value) -> Vec<&'static str> {
    REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| raw.get(field).is_none())
        .collect()
}

pub fn parse_service_account_json(raw: &str) -> LedgerResult<ServiceAccountKey> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| LedgerError::auth(format!("credential is not valid json: {err}")))?;
    let missing = missing_fields(&value);
    if !missing.is_empty() {
        return Err(LedgerError::auth(format!(
            "credential is missing fields: {}",
            missing.join(", ")
        )));
    }
    serde_json::from_value(value)
        .map_err(|err| LedgerError::auth(format!("credential has malformed fields: {err}")))
}

pub fn load_service_account(path: &Path) -> LedgerResult<ServiceAccountKey> {
    let raw = fs::read_to_string(path).map_err(|err| {
        LedgerError::auth(format!("cannot read credential {}: {err}", path.display()))
    })?;
    parse_service_account_json(&raw)
}

#[derive(Debug, Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs an RS256 bearer assertion for the token exchange.
pub fn build_assertion(key: &ServiceAccountKey, issued_at: i64) -> LedgerResult<String> {
    let private_key = decode_private_key(&key.private_key)?;

    let header = JwtHeader {
        alg: "RS256",
        typ: "JWT",
        kid: key.private_key_id.as_deref(),
    };
    let claims = JwtClaims {
        iss: key.client_email.clone(),
        scope: SCOPES.join(" "),
        aud: key.token_uri().to_string(),
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };

    let header_json =
        serde_json::to_vec(&header).map_err(|err| LedgerError::auth(err.to_string()))?;
    let claims_json =
        serde_json::to_vec(&claims).map_err(|err| LedgerError::auth(err.to_string()))?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let signer = SigningKey::<Sha256>::new(private_key);
    let signature = signer
        .try_sign(signing_input.as_bytes())
        .map_err(|err| LedgerError::auth(format!("failed to sign assertion: {err}")))?;

    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

fn decode_private_key(pem: &str) -> LedgerResult<RsaPrivateKey> {
    // Keys pasted through env files often carry literal "\n" sequences.
    let pem = pem.replace("\\n", "\n");
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|err| LedgerError::auth(format!("private_key is not a valid RSA key: {err}")))
}
