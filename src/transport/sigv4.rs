//! AWS SigV4 request signing, used by the Bedrock adapter (§4.D).
//!
//! Algorithm: read the body, compute its SHA-256 hex digest, stamp
//! `Content-Type`/`Accept: application/json`, then sign with the canonical
//! time of signing. Since the body here is always an owned byte buffer
//! (never a single-use stream), "rewinding" is automatic — the same bytes
//! that were hashed are what gets sent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// The empty-string SHA-256 digest, used when signing a request with no
/// body (§8 boundary behavior).
pub fn empty_body_digest() -> String {
    hex::encode(Sha256::digest(b""))
}

#[derive(Debug, Clone)]
pub struct SigV4Signer {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token,
            region: region.into(),
            service: "bedrock".to_string(),
        }
    }

    /// Signs an HTTP request, returning the full set of headers to send
    /// (the caller's headers plus `host`, `x-amz-date`,
    /// `x-amz-security-token` when a session token is set, `Content-Type`,
    /// `Accept`, and `Authorization`).
    pub fn sign_request(
        &self,
        method: &str,
        url: &str,
        extra_headers: &BTreeMap<String, String>,
        body: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<BTreeMap<String, String>, String> {
        let parsed_url = url::Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;
        let host = parsed_url.host_str().ok_or("missing host in URL")?;
        let path = parsed_url.path();
        let query = parsed_url.query().unwrap_or("");

        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = timestamp.format("%Y%m%d").to_string();

        let mut headers = extra_headers.clone();
        headers.insert("host".to_string(), host.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        if let Some(token) = &self.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let mut sorted: Vec<_> = headers.iter().collect();
        sorted.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));

        let canonical_headers = sorted
            .iter()
            .map(|(k, v)| format!("{}:{}", k.to_lowercase(), v.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        let signed_headers = sorted
            .iter()
            .map(|(k, _)| k.to_lowercase())
            .collect::<Vec<_>>()
            .join(";");

        let payload_hash = if body.is_empty() {
            empty_body_digest()
        } else {
            hex::encode(Sha256::digest(body))
        };

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n\n{}\n{}",
            method.to_uppercase(),
            path,
            query,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope =
            format!("{date_stamp}/{}/{}/aws4_request", self.region, self.service);
        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign =
            format!("{algorithm}\n{amz_date}\n{credential_scope}\n{canonical_request_hash}");

        let signature = self.calculate_signature(&string_to_sign, &date_stamp)?;

        let authorization = format!(
            "{algorithm} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key
        );

        let mut final_headers = headers;
        final_headers.insert("Authorization".to_string(), authorization);
        Ok(final_headers)
    }

    fn calculate_signature(
        &self,
        string_to_sign: &str,
        date_stamp: &str,
    ) -> Result<String, String> {
        let k_date = Self::hmac_sha256(
            format!("AWS4{}", self.secret_key).as_bytes(),
            date_stamp.as_bytes(),
        )?;
        let k_region = Self::hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = Self::hmac_sha256(&k_region, self.service.as_bytes())?;
        let k_signing = Self::hmac_sha256(&k_service, b"aws4_request")?;
        let signature = Self::hmac_sha256(&k_signing, string_to_sign.as_bytes())?;
        Ok(hex::encode(signature))
    }

    fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, String> {
        let mut mac = HmacSha256::new_from_slice(key).map_err(|e| format!("HMAC key error: {e}"))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_body_uses_empty_string_digest() {
        let signer = SigV4Signer::new("AKIATEST", "testsecret", None, "us-east-1");
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let signed = signer
            .sign_request(
                "POST",
                "https://bedrock-runtime.us-east-1.amazonaws.com/model/test/invoke",
                &BTreeMap::new(),
                b"",
                timestamp,
            )
            .unwrap();

        assert!(signed.contains_key("Authorization"));
        assert!(signed.contains_key("x-amz-date"));
        assert_eq!(signed.get("content-type").unwrap(), "application/json");
        assert_eq!(signed.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn session_token_is_included_when_present() {
        let signer = SigV4Signer::new(
            "AKIATEST",
            "testsecret",
            Some("sessiontoken".to_string()),
            "us-east-1",
        );
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let signed = signer
            .sign_request(
                "POST",
                "https://bedrock-runtime.us-east-1.amazonaws.com/model/test/converse",
                &BTreeMap::new(),
                b"{}",
                timestamp,
            )
            .unwrap();
        assert_eq!(signed.get("x-amz-security-token").unwrap(), "sessiontoken");
    }

    #[test]
    fn known_hmac_vector() {
        let result = SigV4Signer::hmac_sha256(b"key", b"message").unwrap();
        let expected = "6e9ef29b75fffc5b7abae527d58fdadb2fe42e7219011e917a9c6e0c3d5e4c3b";
        assert_eq!(hex::encode(result), expected);
    }
}
