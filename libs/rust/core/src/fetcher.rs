//! Read side: fetches published versions and checks their signatures.
//!
//! Any verification problem is an error; an unsigned or mis-signed object
//! is never returned.

use std::sync::Arc;

use tracing::debug;

use crate::backend::ObjectSource;
use crate::error::{ApiError, VerificationError};
use crate::objects::{ApiObject, SignatureObject, VersionList, VersionObject};
use crate::signing::Verifier;
use crate::variant::{Variant, VersionDate};
use crate::version::VersionRecord;

pub struct VerifyingFetcher {
    source: Arc<dyn ObjectSource>,
    verifier: Arc<dyn Verifier>,
    prefix: String,
}

impl VerifyingFetcher {
    pub fn new(source: Arc<dyn ObjectSource>, verifier: Arc<dyn Verifier>, prefix: impl Into<String>) -> Self {
        Self { source, verifier, prefix: prefix.into().trim_end_matches('/').to_string() }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, ApiError> {
        debug!(%key, "reading published object");
        self.source.read(key).await.map_err(|e| ApiError::backend("reading", key, e))
    }

    async fn get<T: ApiObject>(&self, req: &T) -> Result<(T, Vec<u8>), ApiError> {
        req.validate_request()?;
        let key = req.path(&self.prefix);
        let data = self.read(&key).await?;
        let obj = req.decode(&data).map_err(|source| ApiError::Decode { kind: T::KIND, key, source })?;
        obj.validate()?;
        Ok((obj, data))
    }

    /// Published versions of `variant`; empty if no list exists.
    pub async fn fetch_list(&self, variant: Variant) -> Result<VersionList, ApiError> {
        match self.get(&VersionList::new(variant)).await {
            Ok((list, _)) => Ok(list),
            Err(e) if e.is_not_found() => Ok(VersionList::new(variant)),
            Err(e) => Err(e),
        }
    }

    pub async fn fetch_version(&self, variant: Variant, date: VersionDate) -> Result<VersionRecord, ApiError> {
        let (obj, body) = self.get(&VersionObject::request(variant, date, false)).await?;
        let path = obj.path(&self.prefix);
        let (sig, _) = self.get(&SignatureObject::request(path.clone())).await?;
        if sig.signed != path {
            return Err(VerificationError(format!("signature at {path}.sig covers {} instead", sig.signed)).into());
        }
        self.verifier.verify(&body, &sig.signature).map_err(|e| VerificationError(format!("{path}: {}", e.0)))?;
        debug!(%variant, %date, "signature verified");
        Ok(obj.record)
    }

    /// Newest published version, or `None` if nothing was published.
    pub async fn fetch_latest(&self, variant: Variant) -> Result<Option<(VersionDate, VersionRecord)>, ApiError> {
        let list = self.fetch_list(variant).await?;
        let Some(name) = list.latest() else { return Ok(None) };
        let date = VersionDate::from_file_name(name)?;
        let record = self.fetch_version(variant, date).await?;
        Ok(Some((date, record)))
    }
}
