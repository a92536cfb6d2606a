use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::SfnError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "states";

/// Content type of the service's JSON 1.0 protocol; part of the signature.
pub const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Static AWS credentials, resolved from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Result<Self, SfnError> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| SfnError::Credentials("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| SfnError::Credentials("AWS_SECRET_ACCESS_KEY is not set".into()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key,
            secret_key,
            session_token,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// Headers to attach to a signed request.
pub struct SignedRequest {
    pub authorization: String,
    pub amz_date: String,
}

/// Produce a SigV4 authorization header for one POST of the JSON protocol.
///
/// The request shape is fixed (method POST, path `/`, no query string), so
/// only the varying parts are taken: host, target operation and payload.
pub fn sign(
    credentials: &Credentials,
    region: &str,
    host: &str,
    amz_target: &str,
    payload: &str,
    now: DateTime<Utc>,
) -> SignedRequest {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let payload_hash = hex::encode(Sha256::digest(payload.as_bytes()));

    // Canonical headers in alphabetical order, lowercase names.
    let mut canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-amz-date:{}\n",
        CONTENT_TYPE, host, amz_date
    );
    let mut signed_headers = String::from("content-type;host;x-amz-date");
    if let Some(token) = &credentials.session_token {
        canonical_headers.push_str("x-amz-security-token:");
        canonical_headers.push_str(token);
        canonical_headers.push('\n');
        signed_headers.push_str(";x-amz-security-token");
    }
    canonical_headers.push_str("x-amz-target:");
    canonical_headers.push_str(amz_target);
    canonical_headers.push('\n');
    signed_headers.push_str(";x-amz-target");

    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", credentials.secret_key).as_bytes(), &date);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, SERVICE);
    let k_signing = hmac(&k_service, "aws4_request");
    let signature = hex::encode(hmac(&k_signing, &string_to_sign));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key, scope, signed_headers, signature
    );

    SignedRequest {
        authorization,
        amz_date,
    }
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts any key length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}
