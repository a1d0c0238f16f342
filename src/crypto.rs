//! Secret handling primitives.
//!
//! - AES-256-GCM authenticated encryption with a fresh 96-bit IV per call
//! - PBKDF2-HMAC-SHA512 salted hashing (100 000 iterations, 512-bit output)
//! - HMAC-SHA256 signatures over canonical JSON
//! - constant-time comparison and CSPRNG token generation
//! - recursive masking of sensitive fields for logging

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const HASH_ITERATIONS: u32 = 100_000;
pub const HASH_LEN: usize = 64;
const SALT_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const REDACTED: &str = "[REDACTED]";

/// Key substrings masked by default before anything is logged.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] =
    &["password", "token", "secret", "authorization", "cookie", "apikey", "api_key"];

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("invalid key material")]
    InvalidKey,
    #[error("payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Output of [`Crypto::hash`]; both fields are hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashOutput {
    pub hash: String,
    pub salt: String,
}

/// Ciphertext, IV and authentication tag, each base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

/// Symmetric crypto service holding a 256-bit key.
#[derive(Clone)]
pub struct Crypto {
    key: [u8; 32],
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypto").field("key", &REDACTED).finish()
    }
}

impl Crypto {
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Accepts 64 hex chars, base64 of exactly 32 bytes, or any other
    /// non-empty passphrase (stretched with SHA-256).
    pub fn from_key_material(raw: &str) -> Result<Self, CryptoError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CryptoError::InvalidKey);
        }
        if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            let bytes = hex::decode(trimmed).map_err(|_| CryptoError::InvalidKey)?;
            let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| CryptoError::InvalidKey)?;
            return Ok(Self::from_key(key));
        }
        for engine in [&general_purpose::STANDARD, &general_purpose::URL_SAFE_NO_PAD] {
            if let Ok(bytes) = engine.decode(trimmed) {
                if let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice()) {
                    return Ok(Self::from_key(key));
                }
            }
        }
        let digest = Sha256::digest(trimmed.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(Self::from_key(key))
    }

    /// A random key that only lives as long as this value; used for
    /// per-session client storage.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::from_key(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedBlob, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;
        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedBlob {
            ciphertext: general_purpose::STANDARD.encode(&sealed),
            iv: general_purpose::STANDARD.encode(iv),
            tag: general_purpose::STANDARD.encode(tag),
        })
    }

    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<String, CryptoError> {
        let decode = |s: &str| general_purpose::STANDARD.decode(s).map_err(|_| CryptoError::DecryptionFailed);
        let iv = decode(&blob.iv)?;
        let tag = decode(&blob.tag)?;
        let mut sealed = decode(&blob.ciphertext)?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encrypts into a single URL-safe token (no `.`, `;` or `=`), suitable
    /// for cookie values.
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let blob = self.encrypt(plaintext)?;
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(&blob)?))
    }

    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let raw = general_purpose::URL_SAFE_NO_PAD.decode(sealed).map_err(|_| CryptoError::DecryptionFailed)?;
        let blob: EncryptedBlob = serde_json::from_slice(&raw).map_err(|_| CryptoError::DecryptionFailed)?;
        self.decrypt(&blob)
    }
}

/// Salted, slow one-way hash. A random salt is generated when none is given.
pub fn hash(data: &str, salt: Option<&str>) -> HashOutput {
    let salt = match salt {
        Some(s) => s.to_string(),
        None => {
            let mut bytes = [0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
    };
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(data.as_bytes(), salt.as_bytes(), HASH_ITERATIONS, &mut out);
    HashOutput { hash: hex::encode(out), salt }
}

pub fn verify_hash(data: &str, expected_hash: &str, salt: &str) -> bool {
    let computed = hash(data, Some(salt));
    safe_compare(&computed.hash, expected_hash)
}

/// HMAC-SHA256 over the canonical JSON form of `payload` (object keys sorted).
pub fn sign<T: Serialize + ?Sized>(payload: &T, secret: &str) -> Result<String, CryptoError> {
    let canonical = canonical_json(payload)?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_signature<T: Serialize + ?Sized>(payload: &T, signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(canonical) = canonical_json(payload) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn canonical_json<T: Serialize + ?Sized>(payload: &T) -> Result<String, CryptoError> {
    // serde_json::Map is ordered by key, so a round-trip through Value sorts objects
    Ok(serde_json::to_value(payload)?.to_string())
}

/// `length` random bytes, URL-safe base64 without padding.
pub fn generate_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn generate_session_id() -> String {
    generate_token(32)
}

/// Constant-time string equality. Unequal lengths return `false` right away;
/// nothing beyond the length leaks through timing.
pub fn safe_compare(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Replaces every leaf whose key contains one of `patterns`
/// (case-insensitive) with [`REDACTED`]. Structure is otherwise preserved.
pub fn mask_sensitive_data(value: &Value, patterns: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let key = k.to_lowercase();
                    let masked = if patterns.iter().any(|p| key.contains(&p.to_lowercase())) {
                        match v {
                            Value::Object(_) | Value::Array(_) => mask_sensitive_data(v, patterns),
                            _ => Value::String(REDACTED.to_string()),
                        }
                    } else {
                        mask_sensitive_data(v, patterns)
                    };
                    (k.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| mask_sensitive_data(v, patterns)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = Crypto::ephemeral();
        let blob = crypto.encrypt("geheime nachricht ✓").unwrap();
        assert_eq!(crypto.decrypt(&blob).unwrap(), "geheime nachricht ✓");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let crypto = Crypto::ephemeral();
        let a = crypto.encrypt("same").unwrap();
        let b = crypto.encrypt("same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let crypto = Crypto::ephemeral();
        let blob = crypto.encrypt("payload").unwrap();
        let mut raw = general_purpose::STANDARD.decode(&blob.ciphertext).unwrap();
        raw[0] ^= 0x01;
        let tampered = EncryptedBlob { ciphertext: general_purpose::STANDARD.encode(raw), ..blob };
        assert!(matches!(crypto.decrypt(&tampered), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_tag_fails_closed() {
        let crypto = Crypto::ephemeral();
        let blob = crypto.encrypt("payload").unwrap();
        let mut tag = general_purpose::STANDARD.decode(&blob.tag).unwrap();
        tag[TAG_LEN - 1] ^= 0x80;
        let tampered = EncryptedBlob { tag: general_purpose::STANDARD.encode(tag), ..blob };
        assert!(matches!(crypto.decrypt(&tampered), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_wrong_key_and_malformed_blob() {
        let blob = Crypto::ephemeral().encrypt("payload").unwrap();
        assert!(matches!(Crypto::ephemeral().decrypt(&blob), Err(CryptoError::DecryptionFailed)));

        let malformed = EncryptedBlob { iv: "not base64!".into(), ..blob };
        assert!(matches!(Crypto::ephemeral().decrypt(&malformed), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_sealed_token_is_cookie_safe() {
        let crypto = Crypto::ephemeral();
        let sealed = crypto.seal("header.payload.signature").unwrap();
        assert!(sealed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(crypto.open(&sealed).unwrap(), "header.payload.signature");

        assert!(matches!(Crypto::ephemeral().open(&sealed), Err(CryptoError::DecryptionFailed)));
        assert!(matches!(crypto.open("not*sealed"), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_key_material_formats() {
        let hex_key = "00".repeat(32);
        let a = Crypto::from_key_material(&hex_key).unwrap();
        let b = Crypto::from_key_material(&general_purpose::STANDARD.encode([0u8; 32])).unwrap();
        let blob = a.encrypt("x").unwrap();
        assert_eq!(b.decrypt(&blob).unwrap(), "x");

        let pass = Crypto::from_key_material("correct horse battery staple").unwrap();
        assert!(a.decrypt(&pass.encrypt("x").unwrap()).is_err());
        assert!(Crypto::from_key_material("   ").is_err());
    }

    #[test]
    fn test_hash_and_verify() {
        let out = hash("s3cret-pass", None);
        assert_eq!(out.hash.len(), HASH_LEN * 2);
        assert!(verify_hash("s3cret-pass", &out.hash, &out.salt));
        assert!(!verify_hash("s3cret-pasS", &out.hash, &out.salt));

        let mut mutated = out.hash.clone().into_bytes();
        mutated[0] = if mutated[0] == b'a' { b'b' } else { b'a' };
        assert!(!verify_hash("s3cret-pass", &String::from_utf8(mutated).unwrap(), &out.salt));
    }

    #[test]
    fn test_hash_is_deterministic_for_salt() {
        assert_eq!(hash("data", Some("salt")), hash("data", Some("salt")));
        assert_ne!(hash("data", None).salt, hash("data", None).salt);
    }

    #[test]
    fn test_sign_is_canonical() {
        let a = json!({"b": 1, "a": {"y": true, "x": null}});
        let b = json!({"a": {"x": null, "y": true}, "b": 1});
        let sig = sign(&a, "k").unwrap();
        assert_eq!(sig, sign(&b, "k").unwrap());
        assert!(verify_signature(&b, &sig, "k"));
        assert!(!verify_signature(&b, &sig, "other"));
        assert!(!verify_signature(&json!({"b": 2}), &sig, "k"));
        assert!(!verify_signature(&a, "zz-not-hex", "k"));
    }

    #[test]
    fn test_generate_token() {
        let t = generate_token(32);
        assert_eq!(t.len(), 43);
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(generate_session_id(), generate_session_id());
    }

    #[test]
    fn test_safe_compare() {
        assert!(safe_compare("abc", "abc"));
        assert!(!safe_compare("abc", "abd"));
        assert!(!safe_compare("abc", "abcd"));
        assert!(safe_compare("", ""));
    }

    #[test]
    fn test_mask_sensitive_data() {
        let input = json!({
            "email": "a@b.c",
            "Password": "hunter2",
            "nested": {"accessToken": "xyz", "keep": 1},
            "list": [{"api_key": "k"}, "plain"]
        });
        let masked = mask_sensitive_data(&input, DEFAULT_SENSITIVE_FIELDS);
        assert_eq!(masked["email"], "a@b.c");
        assert_eq!(masked["Password"], REDACTED);
        assert_eq!(masked["nested"]["accessToken"], REDACTED);
        assert_eq!(masked["nested"]["keep"], 1);
        assert_eq!(masked["list"][0]["api_key"], REDACTED);
        assert_eq!(masked["list"][1], "plain");
    }
}
