//! Opaque pagination cursors.
//!
//! A cursor wraps the table's native continuation key: the attribute map of
//! the last row returned. On the wire it is URL-safe base64 (no padding) of
//! the map's JSON object form. The codec checks structure only; it never
//! looks at the values.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use std::collections::BTreeMap;
use thiserror::Error;

/// Upper bound on an incoming token, checked before decoding.
pub const MAX_TOKEN_LEN: usize = 2048;

/// Native continuation key: attribute name → value.
pub type NativeKey = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("pagination token too large: {0} bytes (max: {MAX_TOKEN_LEN})")]
    TooLarge(usize),
    #[error("pagination token is not valid base64")]
    Encoding,
    #[error("pagination token does not contain a key map")]
    Structure,
    #[error("pagination token has unexpected key attributes")]
    KeyNames,
    #[error("pagination token is missing attribute `{0}`")]
    MissingAttribute(&'static str),
}

/// Which key layout a cursor must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// Owner + time secondary index.
    OwnerIndex,
    /// Table primary key, used by full scans.
    PrimaryKey,
}

impl KeyShape {
    pub fn attributes(self) -> &'static [&'static str] {
        match self {
            KeyShape::OwnerIndex => &["image_id", "owner_id", "upload_timestamp"],
            KeyShape::PrimaryKey => &["image_id"],
        }
    }
}

/// Decoded cursor; a thin wrapper over the native key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(NativeKey);

impl PageCursor {
    pub fn new(key: NativeKey) -> Self {
        Self(key)
    }

    /// Build a cursor from `(attribute, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn key(&self) -> &NativeKey {
        &self.0
    }

    /// Value of a key attribute.
    pub fn attribute(&self, name: &'static str) -> Result<&str, CursorError> {
        self.0
            .get(name)
            .map(String::as_str)
            .ok_or(CursorError::MissingAttribute(name))
    }

    /// Serialize to a client token. An empty key means "no more results"
    /// and yields no token.
    pub fn encode(&self) -> Option<String> {
        encode(Some(&self.0))
    }

    /// Parse a client token, requiring exactly the attributes of `shape`.
    pub fn decode(token: &str, shape: KeyShape) -> Result<Self, CursorError> {
        decode(token, shape).map(Self)
    }
}

/// Encode a native key. `None` or an empty map yields `None`.
pub fn encode(key: Option<&NativeKey>) -> Option<String> {
    let key = key.filter(|k| !k.is_empty())?;
    // A map of strings always serializes.
    let json = serde_json::to_vec(key).ok()?;
    Some(URL_SAFE_NO_PAD.encode(json))
}

/// Inverse of [`encode`].
pub fn decode(token: &str, shape: KeyShape) -> Result<NativeKey, CursorError> {
    if token.len() > MAX_TOKEN_LEN {
        return Err(CursorError::TooLarge(token.len()));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim_end_matches('='))
        .map_err(|_| CursorError::Encoding)?;
    let key: NativeKey = serde_json::from_slice(&bytes).map_err(|_| CursorError::Structure)?;

    let expected = shape.attributes();
    if key.len() != expected.len() || !expected.iter().all(|name| key.contains_key(*name)) {
        return Err(CursorError::KeyNames);
    }
    Ok(key)
}
