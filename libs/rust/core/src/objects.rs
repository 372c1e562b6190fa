//! Objects served by the attestation config API and their storage layout.
//!
//! ```text
//! <prefix>/<variant>/list                          VersionList
//! <prefix>/<variant>/<date>.json                   VersionObject
//! <prefix>/<variant>/<date>.json.sig               SignatureObject
//! <prefix>/<variant>/cached-versions/<date>.json   VersionObject (cached)
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::variant::{Variant, VersionDate};
use crate::version::VersionRecord;

pub const CACHED_VERSIONS_DIR: &str = "cached-versions";
pub const LIST_NAME: &str = "list";
pub const SIGNATURE_SUFFIX: &str = ".sig";

/// An object that can be read from and written to the object store.
///
/// `validate_request` guards reads and deletes and only looks at the
/// fields that make up the path; `validate` guards writes and decoded
/// responses. `decode` is called on the request so the response can
/// inherit fields that live in the path rather than the body.
pub trait ApiObject: Sized + Send + Sync {
    const KIND: &'static str;

    fn path(&self, prefix: &str) -> String;
    fn validate_request(&self) -> Result<(), ApiError>;
    fn validate(&self) -> Result<(), ApiError>;
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error>;
    fn decode(&self, data: &[u8]) -> Result<Self, serde_json::Error>;
}

pub fn variant_dir(prefix: &str, variant: Variant) -> String { format!("{}/{}", prefix.trim_end_matches('/'), variant) }

/// A version record stored under a variant and date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionObject {
    pub variant: Variant,
    pub date: VersionDate,
    /// Stored in the observation cache instead of the published tree.
    pub cached: bool,
    pub record: VersionRecord,
}

impl VersionObject {
    pub fn published(variant: Variant, date: VersionDate, record: VersionRecord) -> Self { Self { variant, date, cached: false, record } }

    pub fn cached(variant: Variant, date: VersionDate, record: VersionRecord) -> Self { Self { variant, date, cached: true, record } }

    /// Read/delete request; the record is filled in by `decode`.
    pub fn request(variant: Variant, date: VersionDate, cached: bool) -> Self {
        Self { variant, date, cached, record: VersionRecord::zero(variant.family()) }
    }
}

impl ApiObject for VersionObject {
    const KIND: &'static str = "version object";

    fn path(&self, prefix: &str) -> String {
        let dir = variant_dir(prefix, self.variant);
        if self.cached {
            format!("{dir}/{CACHED_VERSIONS_DIR}/{}", self.date.file_name())
        } else {
            format!("{dir}/{}", self.date.file_name())
        }
    }

    fn validate_request(&self) -> Result<(), ApiError> { Ok(()) }

    fn validate(&self) -> Result<(), ApiError> {
        if self.record.family() != self.variant.family() {
            return Err(ApiError::validation(Self::KIND, format!("{} record stored under {} variant {}", self.record.family(), self.variant.family(), self.variant)));
        }
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> { self.record.to_json() }

    fn decode(&self, data: &[u8]) -> Result<Self, serde_json::Error> {
        let record = VersionRecord::from_json(self.variant.family(), data)?;
        Ok(Self { record, ..self.clone() })
    }
}

/// Published version file names of a variant, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionList {
    pub variant: Variant,
    pub versions: Vec<String>,
}

impl VersionList {
    pub fn new(variant: Variant) -> Self { Self { variant, versions: Vec::new() } }

    /// Adds `name` unless present and keeps the list sorted descending.
    pub fn add_version(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.versions.contains(&name) { self.versions.push(name); }
        self.versions.sort_unstable_by(|a, b| b.cmp(a));
    }

    /// Returns whether `name` was listed.
    pub fn remove_version(&mut self, name: &str) -> bool {
        let before = self.versions.len();
        self.versions.retain(|v| v != name);
        self.versions.len() != before
    }

    pub fn latest(&self) -> Option<&str> { self.versions.first().map(String::as_str) }

    pub fn is_empty(&self) -> bool { self.versions.is_empty() }
}

impl ApiObject for VersionList {
    const KIND: &'static str = "version list";

    fn path(&self, prefix: &str) -> String { format!("{}/{LIST_NAME}", variant_dir(prefix, self.variant)) }

    fn validate_request(&self) -> Result<(), ApiError> { Ok(()) }

    fn validate(&self) -> Result<(), ApiError> {
        if self.versions.is_empty() {
            return Err(ApiError::validation(Self::KIND, "list has no versions"));
        }
        if let Some(bad) = self.versions.iter().find(|v| !v.ends_with(".json")) {
            return Err(ApiError::validation(Self::KIND, format!("entry {bad:?} does not end with .json")));
        }
        if self.versions.windows(2).any(|w| w[0] <= w[1]) {
            return Err(ApiError::validation(Self::KIND, "entries are not unique and sorted descending"));
        }
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> { serde_json::to_vec(&self.versions) }

    fn decode(&self, data: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(Self { variant: self.variant, versions: serde_json::from_slice(data)? })
    }
}

/// Detached signature stored next to the object it signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureObject {
    /// Full storage path of the signed object.
    pub signed: String,
    pub signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct SignatureWire {
    signed: String,
    signature: String,
}

impl SignatureObject {
    pub fn request(signed: impl Into<String>) -> Self { Self { signed: signed.into(), signature: Vec::new() } }
}

impl ApiObject for SignatureObject {
    const KIND: &'static str = "signature object";

    fn path(&self, _prefix: &str) -> String { format!("{}{SIGNATURE_SUFFIX}", self.signed) }

    fn validate_request(&self) -> Result<(), ApiError> {
        if !self.signed.ends_with(".json") {
            return Err(ApiError::validation(Self::KIND, format!("signed path {:?} does not end with .json", self.signed)));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ApiError> {
        self.validate_request()?;
        if self.signature.is_empty() {
            return Err(ApiError::validation(Self::KIND, "signature is empty"));
        }
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&SignatureWire { signed: self.signed.clone(), signature: BASE64.encode(&self.signature) })
    }

    fn decode(&self, data: &[u8]) -> Result<Self, serde_json::Error> {
        let wire: SignatureWire = serde_json::from_slice(data)?;
        let signature = BASE64.decode(wire.signature.as_bytes()).map_err(<serde_json::Error as serde::de::Error>::custom)?;
        Ok(Self { signed: wire.signed, signature })
    }
}
