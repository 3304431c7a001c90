//! Bulk ingestion of scanned Lloyd George records staged by GP practices.
//!
//! Each SQS message describes every file staged for one patient. The set is
//! validated against the naming convention and PDS, held back until the virus
//! scanner has reported on every file, and then moved into the record bucket as a
//! single final record. S3 and DynamoDB writes cannot share a transaction, so the
//! transfer is sequential and undone by hand when any step fails.
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{BulkUploadError, StoreError};
use crate::models::{
    BulkUploadReport, CLAIMED_MARKER_VERSION, DocumentReference, DocumentStatus, DocumentType, PDF_CONTENT_TYPE, ScanResult,
    StagingMetadata, record_key, s3_location,
};
use crate::stores::{DocumentStore, MessageQueue, ObjectStore, PatientLookup, ReportStore};
use crate::validation::{validate_lloyd_george_file_set, validate_nhs_number, validate_patient_matches};

/// Upper bound of the random delay added to each requeue.
const REQUEUE_JITTER_SECONDS: i32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum BulkUploadOutcome {
    Completed { record_id: String, document_ids: Vec<String> },
    Failed { reason: String },
    Requeued { retries: u32 },
}

/// Everything written during a transfer, in order, so it can be undone.
#[derive(Debug, Default)]
struct Transferred {
    object_keys: Vec<String>,
    document_ids: Vec<String>,
}

pub struct BulkUploadService<D, O, P, Q, R> {
    pub config: Config,
    pub documents: D,
    pub objects: O,
    pub patients: P,
    pub queue: Q,
    pub reports: R,
}

impl<D, O, P, Q, R> BulkUploadService<D, O, P, Q, R>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
    P: PatientLookup + Sync,
    Q: MessageQueue + Sync,
    R: ReportStore + Sync,
{
    pub fn new(config: Config, documents: D, objects: O, patients: P, queue: Q, reports: R) -> Self {
        Self { config, documents, objects, patients, queue, reports }
    }

    pub async fn handle_sqs_message(&self, body: &str) -> Result<BulkUploadOutcome, BulkUploadError> {
        let metadata: StagingMetadata = serde_json::from_str(body)?;
        self.process(metadata).await
    }

    pub async fn process(&self, metadata: StagingMetadata) -> Result<BulkUploadOutcome, BulkUploadError> {
        info!(
            nhs_number = %metadata.nhs_number,
            files = metadata.files.len(),
            retries = metadata.retries,
            "Processing staged upload"
        );

        let nhs_number = match validate_nhs_number(&metadata.nhs_number) {
            Ok(nhs_number) => nhs_number,
            Err(e) => return self.fail(&metadata, e.to_string(), None).await,
        };

        let file_names = metadata.file_names();
        let files = match validate_lloyd_george_file_set(&file_names, &nhs_number) {
            Ok(files) => files,
            Err(e) => return self.fail(&metadata, e.to_string(), None).await,
        };

        let patient = match self.patients.patient_details(&nhs_number).await {
            Ok(patient) => patient,
            Err(e) => return self.fail(&metadata, format!("PDS lookup failed: {}", e), None).await,
        };
        let pds_ods_code = patient.general_practice_ods.clone();

        // The set validated as consistent, so any file carries the patient's name and birth date
        if let Some(file) = files.first()
            && let Err(e) = validate_patient_matches(
                file,
                &patient,
                metadata.uploader_ods_code(),
                &self.config.suspended_ods_codes,
            )
        {
            return self.fail(&metadata, e.to_string(), pds_ods_code).await;
        }

        match self.scan_verdict(&metadata).await {
            Ok(ScanResult::Clean) => {}
            Ok(ScanResult::Pending) => return self.requeue(metadata, pds_ods_code).await,
            Ok(other) => {
                let reason = format!("virus scan result: {}", other.as_str());
                return self.fail(&metadata, reason, pds_ods_code).await;
            }
            Err(e) => {
                let reason = format!("failed to read virus scan result: {}", e);
                return self.fail(&metadata, reason, pds_ods_code).await;
            }
        }

        let current_gp_ods_code = pds_ods_code
            .clone()
            .unwrap_or_else(|| metadata.uploader_ods_code().to_string());

        let record_id = record_id_for(&metadata)?;
        match self.transfer(&metadata, &nhs_number, &record_id, &current_gp_ods_code).await {
            Ok(document_ids) => {
                // Staged files stay until the report is stored so a redelivery can still validate them
                self.write_report(BulkUploadReport::complete(&metadata, pds_ods_code, Utc::now()))
                    .await?;
                self.delete_staged(&metadata).await;
                info!(nhs_number = %nhs_number, record_id = %record_id, "Bulk upload complete");
                Ok(BulkUploadOutcome::Completed { record_id, document_ids })
            }
            Err(reason) => self.fail(&metadata, reason, pds_ods_code).await,
        }
    }

    /// Worst verdict across the set. A definite failure on any file outranks files
    /// that are still waiting for the scanner.
    async fn scan_verdict(&self, metadata: &StagingMetadata) -> Result<ScanResult, StoreError> {
        let mut verdict = ScanResult::Clean;
        for file in &metadata.files {
            let tag = self
                .objects
                .object_tag(&self.config.staging_bucket, &file.file_path, &self.config.scan_result_tag_key)
                .await?;
            match ScanResult::from_tag(tag.as_deref()) {
                ScanResult::Clean => {}
                ScanResult::Pending => verdict = ScanResult::Pending,
                failed => return Ok(failed),
            }
        }
        Ok(verdict)
    }

    async fn requeue(
        &self,
        mut metadata: StagingMetadata,
        pds_ods_code: Option<String>,
    ) -> Result<BulkUploadOutcome, BulkUploadError> {
        if metadata.retries >= self.config.max_scan_retries {
            let reason = format!("virus scan did not complete after {} retries", metadata.retries);
            return self.fail(&metadata, reason, pds_ods_code).await;
        }

        metadata.retries += 1;
        let body = serde_json::to_string(&metadata).map_err(BulkUploadError::Encode)?;
        let delay = self.config.requeue_delay_seconds + rand::rng().random_range(0..=REQUEUE_JITTER_SECONDS);

        self.queue
            .send_message(&body, delay)
            .await
            .map_err(BulkUploadError::Requeue)?;

        info!(nhs_number = %metadata.nhs_number, retries = metadata.retries, delay, "Virus scan pending, requeued");
        Ok(BulkUploadOutcome::Requeued { retries: metadata.retries })
    }

    /// Claims the patient's Lloyd George record and moves every file into it. On
    /// failure everything already written is removed and the reason returned.
    async fn transfer(
        &self,
        metadata: &StagingMetadata,
        nhs_number: &str,
        record_id: &str,
        current_gp_ods_code: &str,
    ) -> Result<Vec<String>, String> {
        let document_ids: Vec<String> = metadata.files.iter().map(|_| uuid::Uuid::new_v4().to_string()).collect();
        let now = Utc::now();

        match self
            .documents
            .claim_final_record(nhs_number, DocumentType::LloydGeorge, record_id, &document_ids, now)
            .await
        {
            Ok(()) => {}
            Err(StoreError::ConditionFailed(_)) => {
                return match self.transferred_earlier(nhs_number, record_id).await {
                    Ok(Some(document_ids)) => {
                        info!(nhs_number, record_id, "File set was already transferred by an earlier delivery");
                        Ok(document_ids)
                    }
                    Ok(None) => Err("patient already has a Lloyd George record".to_string()),
                    Err(e) => Err(format!("failed to read the patient's record: {}", e)),
                };
            }
            Err(e) => return Err(format!("failed to reserve the patient's record: {}", e)),
        }

        let mut transferred = Transferred::default();
        match self
            .transfer_files(metadata, nhs_number, record_id, &document_ids, current_gp_ods_code, now, &mut transferred)
            .await
        {
            Ok(()) => Ok(transferred.document_ids),
            Err(e) => {
                error!(nhs_number, record_id, error = %e, "Transfer failed, rolling back");
                self.rollback(nhs_number, record_id, &transferred).await;
                Err(format!("failed to transfer files: {}", e))
            }
        }
    }

    /// The documents of the current record when it was built from this same file set
    /// and every one of them is final.
    async fn transferred_earlier(&self, nhs_number: &str, record_id: &str) -> Result<Option<Vec<String>>, StoreError> {
        let Some(marker) = self
            .documents
            .current_final_record(nhs_number, DocumentType::LloydGeorge)
            .await?
        else {
            return Ok(None);
        };
        if marker.current_record_id != record_id {
            return Ok(None);
        }

        for id in &marker.document_ids {
            match self.documents.get_document(id).await? {
                Some(document) if document.status == DocumentStatus::Final => {}
                _ => return Ok(None),
            }
        }
        Ok(Some(marker.document_ids))
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer_files(
        &self,
        metadata: &StagingMetadata,
        nhs_number: &str,
        record_id: &str,
        document_ids: &[String],
        current_gp_ods_code: &str,
        now: DateTime<Utc>,
        transferred: &mut Transferred,
    ) -> Result<(), StoreError> {
        for (file, document_id) in metadata.files.iter().zip(document_ids) {
            let dest_key = record_key(nhs_number, document_id);

            let copied = self
                .objects
                .copy_object(&self.config.staging_bucket, &file.file_path, &self.config.lloyd_george_bucket, &dest_key)
                .await?;
            transferred.object_keys.push(dest_key.clone());

            let document = DocumentReference {
                id: document_id.clone(),
                nhs_number: nhs_number.to_string(),
                document_type: DocumentType::LloydGeorge,
                record_id: record_id.to_string(),
                file_name: file.file_name().to_string(),
                content_type: PDF_CONTENT_TYPE.to_string(),
                file_location: s3_location(&self.config.lloyd_george_bucket, &dest_key),
                file_size: copied.size,
                s3_version_id: copied.version_id,
                status: DocumentStatus::Final,
                virus_scanner_result: Some(ScanResult::Clean),
                current_gp_ods_code: current_gp_ods_code.to_string(),
                created: now,
                last_updated: now,
                deleted: None,
                ttl: None,
            };
            self.documents.put_document(&document).await?;
            transferred.document_ids.push(document_id.clone());
        }
        Ok(())
    }

    /// Best effort; a failure here is logged and never replaces the original error.
    async fn rollback(&self, nhs_number: &str, record_id: &str, transferred: &Transferred) {
        for key in &transferred.object_keys {
            if let Err(e) = self.objects.delete_object(&self.config.lloyd_george_bucket, key).await {
                error!(key = %key, error = %e, "Rollback: failed to delete copied object");
            }
        }
        for id in &transferred.document_ids {
            if let Err(e) = self.documents.delete_document(id).await {
                error!(document_id = %id, error = %e, "Rollback: failed to delete document reference");
            }
        }
        if let Err(e) = self
            .documents
            .release_final_record(nhs_number, DocumentType::LloydGeorge, record_id, CLAIMED_MARKER_VERSION)
            .await
        {
            error!(nhs_number, record_id, error = %e, "Rollback: failed to release final record marker");
        }
    }

    async fn delete_staged(&self, metadata: &StagingMetadata) {
        for file in &metadata.files {
            if let Err(e) = self.objects.delete_object(&self.config.staging_bucket, &file.file_path).await {
                warn!(key = %file.file_path, error = %e, "Failed to delete staged file");
            }
        }
    }

    async fn fail(
        &self,
        metadata: &StagingMetadata,
        reason: String,
        pds_ods_code: Option<String>,
    ) -> Result<BulkUploadOutcome, BulkUploadError> {
        warn!(nhs_number = %metadata.nhs_number, reason = %reason, "Bulk upload rejected");
        self.write_report(BulkUploadReport::failed(metadata, reason.clone(), pds_ods_code, Utc::now()))
            .await?;
        Ok(BulkUploadOutcome::Failed { reason })
    }

    async fn write_report(&self, report: BulkUploadReport) -> Result<(), BulkUploadError> {
        self.reports.put_report(&report).await.map_err(BulkUploadError::Report)
    }
}

/// The same file set always maps to the same record, which lets a redelivered
/// message recognise the record an earlier delivery built.
fn record_id_for(metadata: &StagingMetadata) -> Result<String, BulkUploadError> {
    let files = serde_json::to_vec(&metadata.files).map_err(BulkUploadError::Encode)?;
    Ok(uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, &files).to_string())
}
