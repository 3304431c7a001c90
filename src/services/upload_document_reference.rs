//! Final step of a single document upload: once the virus scanner has tagged the
//! staged object, the document either becomes the patient's final record or is
//! cancelled.
use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{StoreError, UploadError};
use crate::models::{DocumentReference, DocumentStatus, ScanResult, parse_staging_key, record_key, s3_location};
use crate::stores::{DocumentStore, FinalizeRequest, ObjectInfo, ObjectStore};

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Finalized { document_id: String, superseded: Vec<String> },
    Rejected { document_id: String, scan_result: ScanResult },
    AlreadyProcessed { document_id: String, status: DocumentStatus },
}

pub struct UploadDocumentReferenceService<D, O> {
    pub config: Config,
    pub documents: D,
    pub objects: O,
}

impl<D, O> UploadDocumentReferenceService<D, O>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    pub fn new(config: Config, documents: D, objects: O) -> Self {
        Self { config, documents, objects }
    }

    pub async fn handle_upload(&self, object_key: &str) -> Result<UploadOutcome, UploadError> {
        let (nhs_number, document_id) =
            parse_staging_key(object_key).ok_or_else(|| UploadError::InvalidObjectKey(object_key.to_string()))?;

        let document = self
            .documents
            .get_document(document_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(document_id.to_string()))?;

        if document.nhs_number != nhs_number {
            return Err(UploadError::InvalidObjectKey(object_key.to_string()));
        }

        if document.status != DocumentStatus::Preliminary {
            info!(document_id, status = document.status.as_str(), "Document already processed, skipping");
            return Ok(UploadOutcome::AlreadyProcessed { document_id: document.id, status: document.status });
        }

        let tag = self
            .objects
            .object_tag(&self.config.staging_bucket, object_key, &self.config.scan_result_tag_key)
            .await?;

        match ScanResult::from_tag(tag.as_deref()) {
            ScanResult::Pending => Err(UploadError::ScanPending(document.id)),
            ScanResult::Clean => self.finalize(document, object_key).await,
            rejected => self.reject(document, object_key, rejected).await,
        }
    }

    async fn reject(
        &self,
        document: DocumentReference,
        object_key: &str,
        scan_result: ScanResult,
    ) -> Result<UploadOutcome, UploadError> {
        warn!(document_id = %document.id, scan_result = scan_result.as_str(), "Virus scan failed, cancelling document");

        match self.documents.cancel_document(&document.id, scan_result, Utc::now()).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed(_)) => return self.already_processed(&document.id).await,
            Err(e) => return Err(e.into()),
        }

        self.delete_staged(object_key).await;
        Ok(UploadOutcome::Rejected { document_id: document.id, scan_result })
    }

    async fn finalize(&self, document: DocumentReference, object_key: &str) -> Result<UploadOutcome, UploadError> {
        let dest_key = record_key(&document.nhs_number, &document.id);
        let copied = self
            .objects
            .copy_object(&self.config.staging_bucket, object_key, &self.config.lloyd_george_bucket, &dest_key)
            .await?;

        let superseded = match self.commit(&document, &dest_key, copied).await {
            Ok(superseded) => superseded,
            Err(StoreError::ConditionFailed(reason)) => {
                // A duplicate event for this document may have won; its copy lives at the same key
                if let Some(current) = self.documents.get_document(&document.id).await?
                    && current.status != DocumentStatus::Preliminary
                {
                    return Ok(UploadOutcome::AlreadyProcessed { document_id: current.id, status: current.status });
                }
                self.remove_copy(&dest_key).await;
                warn!(document_id = %document.id, reason = %reason, "Concurrent finalisation detected");
                return Err(UploadError::Conflict { document_id: document.id, reason });
            }
            Err(e) => {
                self.remove_copy(&dest_key).await;
                return Err(e.into());
            }
        };

        self.delete_staged(object_key).await;

        info!(
            document_id = %document.id,
            record_id = %document.record_id,
            superseded = superseded.len(),
            "Document finalised"
        );
        Ok(UploadOutcome::Finalized { document_id: document.id, superseded })
    }

    /// Runs the finalise transaction against the marker as it is now. The marker
    /// lists the current record's documents, so the set to supersede is exact.
    async fn commit(
        &self,
        document: &DocumentReference,
        dest_key: &str,
        copied: ObjectInfo,
    ) -> Result<Vec<String>, StoreError> {
        let expected = self
            .documents
            .current_final_record(&document.nhs_number, document.document_type)
            .await?;

        // Sibling files of the same record stay final alongside this one
        let (superseded_document_ids, mut record_document_ids) = match &expected {
            Some(marker) if marker.current_record_id == document.record_id => (Vec::new(), marker.document_ids.clone()),
            Some(marker) => (marker.document_ids.clone(), Vec::new()),
            None => (Vec::new(), Vec::new()),
        };
        if !record_document_ids.contains(&document.id) {
            record_document_ids.push(document.id.clone());
        }

        let request = FinalizeRequest {
            document_id: document.id.clone(),
            record_id: document.record_id.clone(),
            nhs_number: document.nhs_number.clone(),
            document_type: document.document_type,
            file_location: s3_location(&self.config.lloyd_george_bucket, dest_key),
            file_size: copied.size,
            s3_version_id: copied.version_id,
            scan_result: ScanResult::Clean,
            expected_marker: expected,
            superseded_document_ids: superseded_document_ids.clone(),
            record_document_ids,
            finalized_at: Utc::now(),
        };
        self.documents.finalize_and_supersede(&request).await?;

        Ok(superseded_document_ids)
    }

    async fn already_processed(&self, document_id: &str) -> Result<UploadOutcome, UploadError> {
        let current = self
            .documents
            .get_document(document_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(document_id.to_string()))?;
        Ok(UploadOutcome::AlreadyProcessed { document_id: current.id, status: current.status })
    }

    async fn remove_copy(&self, dest_key: &str) {
        if let Err(e) = self.objects.delete_object(&self.config.lloyd_george_bucket, dest_key).await {
            error!(key = dest_key, error = %e, "Failed to roll back copied object");
        }
    }

    async fn delete_staged(&self, object_key: &str) {
        if let Err(e) = self.objects.delete_object(&self.config.staging_bucket, object_key).await {
            warn!(key = object_key, error = %e, "Failed to delete staged object");
        }
    }
}
