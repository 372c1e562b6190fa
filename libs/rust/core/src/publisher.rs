//! Signed publication of version objects.
//!
//! Publishing writes the version object, then its detached signature, then
//! the updated version list. Each write is idempotent by path, so a failed
//! publish is retried by running it again.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{ApiError, PublishStep};
use crate::metrics::{variant_attr, API_METRICS};
use crate::objects::{ApiObject, SignatureObject, VersionList, VersionObject};
use crate::signing::Signer;
use crate::store::VersionedObjectStore;
use crate::variant::{Variant, VersionDate};
use crate::version::VersionRecord;

pub struct SignedPublisher {
    store: Arc<VersionedObjectStore>,
    signer: Arc<dyn Signer>,
}

impl SignedPublisher {
    pub fn new(store: Arc<VersionedObjectStore>, signer: Arc<dyn Signer>) -> Self { Self { store, signer } }

    pub fn store(&self) -> &Arc<VersionedObjectStore> { &self.store }

    /// Publishes `record` under `date` and adds it to the variant's version list.
    pub async fn publish_latest(&self, variant: Variant, record: VersionRecord, date: VersionDate) -> Result<(), ApiError> {
        let obj = VersionObject::published(variant, date, record);
        obj.validate()?;

        let mut list = self.list(variant).await.map_err(|e| ApiError::publish(variant, PublishStep::FetchList, e))?;

        let body = obj.encode().map_err(|source| ApiError::Encode { kind: VersionObject::KIND, source })?;
        let signature = self.signer.sign(&body).map_err(|e| ApiError::publish(variant, PublishStep::Sign, e.into()))?;
        let sig = SignatureObject { signed: self.store.key_for(&obj), signature };

        self.store.update(&obj).await.map_err(|e| ApiError::publish(variant, PublishStep::WriteVersion, e))?;
        self.store.update(&sig).await.map_err(|e| ApiError::publish(variant, PublishStep::WriteSignature, e))?;

        list.add_version(date.file_name());
        self.store.update(&list).await.map_err(|e| ApiError::publish(variant, PublishStep::WriteList, e))?;

        API_METRICS.publishes_total.add(1, &variant_attr(variant));
        info!(%variant, %date, %record, "published version");
        Ok(())
    }

    /// Removes a published version, its signature and its list entry.
    /// `name` may be given with or without the `.json` suffix.
    pub async fn delete_version(&self, variant: Variant, name: &str) -> Result<(), ApiError> {
        let file_name = if name.ends_with(".json") { name.to_string() } else { format!("{name}.json") };
        let date = VersionDate::from_file_name(&file_name)?;

        let mut list = self.list(variant).await.map_err(|e| ApiError::publish(variant, PublishStep::FetchList, e))?;
        let req = VersionObject::request(variant, date, false);
        if !list.remove_version(&file_name) {
            return Err(ApiError::NotFound { key: self.store.key_for(&req) });
        }

        self.store.delete(&req).await.map_err(|e| ApiError::publish(variant, PublishStep::DeleteVersion, e))?;
        let sig = SignatureObject::request(self.store.key_for(&req));
        self.store.delete(&sig).await.map_err(|e| ApiError::publish(variant, PublishStep::DeleteSignature, e))?;

        let res = if list.is_empty() {
            warn!(%variant, "last published version removed, deleting version list");
            self.store.delete(&list).await
        } else {
            self.store.update(&list).await
        };
        res.map_err(|e| ApiError::publish(variant, PublishStep::WriteList, e))?;
        info!(%variant, version = %file_name, "deleted version");
        Ok(())
    }

    /// Published versions of `variant`; empty when nothing was published yet.
    pub async fn list(&self, variant: Variant) -> Result<VersionList, ApiError> {
        match self.store.fetch(&VersionList::new(variant)).await {
            Ok(list) => Ok(list),
            Err(e) if e.is_not_found() => Ok(VersionList::new(variant)),
            Err(e) => Err(e),
        }
    }
}
