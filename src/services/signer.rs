//! HMAC-SHA256 signing of delegated upload policies and download URLs.
//!
//! Upload credentials follow the shape of an S3 browser POST: a base64 JSON
//! policy plus its signature, sent back as form fields next to the file.
//! Download credentials are query parameters on a GET URL.

use crate::services::object_store::{ObjectStoreError, ObjectStoreResult};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Conditions a delegated upload must satisfy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub expiration: DateTime<Utc>,
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    /// Exact body size; both ends of the allowed range.
    pub content_length: i64,
}

/// Holds the MAC already keyed with the signing secret; each signature
/// starts from a clone of it.
#[derive(Clone)]
pub struct UrlSigner {
    keyed: HmacSha256,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        // HMAC pads or hashes the key to the block size, so no length is
        // refused and this never fails.
        let keyed = HmacSha256::new_from_slice(secret.as_ref())
            .expect("HMAC accepts keys of any length");
        Self { keyed }
    }

    fn mac(&self) -> HmacSha256 {
        self.keyed.clone()
    }

    /// Hex signature of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }

    /// Encode and sign a policy. Returns `(policy, signature)`.
    pub fn sign_policy(&self, policy: &UploadPolicy) -> ObjectStoreResult<(String, String)> {
        let json = serde_json::to_vec(policy)
            .map_err(|err| ObjectStoreError::Backend(format!("encoding upload policy: {}", err)))?;
        let encoded = STANDARD.encode(json);
        let signature = self.sign(encoded.as_bytes());
        Ok((encoded, signature))
    }

    /// Check the signature and expiry of an encoded policy and decode it.
    pub fn verify_policy(
        &self,
        encoded: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> ObjectStoreResult<UploadPolicy> {
        if !self.verify(encoded.as_bytes(), signature) {
            return Err(ObjectStoreError::InvalidSignature);
        }
        let policy: UploadPolicy = STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or(ObjectStoreError::InvalidSignature)?;
        if policy.expiration < now {
            return Err(ObjectStoreError::Expired);
        }
        Ok(policy)
    }

    /// Signature for a download of `bucket/key` valid until `expires`
    /// (unix seconds).
    pub fn sign_download(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        disposition: Option<&str>,
    ) -> String {
        self.sign(download_payload(bucket, key, expires, disposition).as_bytes())
    }

    pub fn verify_download(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        disposition: Option<&str>,
        signature: &str,
        now: DateTime<Utc>,
    ) -> ObjectStoreResult<()> {
        let payload = download_payload(bucket, key, expires, disposition);
        if !self.verify(payload.as_bytes(), signature) {
            return Err(ObjectStoreError::InvalidSignature);
        }
        if expires < now.timestamp() {
            return Err(ObjectStoreError::Expired);
        }
        Ok(())
    }
}

fn download_payload(bucket: &str, key: &str, expires: i64, disposition: Option<&str>) -> String {
    format!(
        "GET\n{}\n{}\n{}\n{}",
        bucket,
        key,
        expires,
        disposition.unwrap_or("")
    )
}
