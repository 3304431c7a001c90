//! Create, search, download and delete operations behind the HTTP API.
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{DocumentReferenceError, StoreError, ValidationError};
use crate::models::{
    CreateDocumentReferenceRequest, DocumentReference, DocumentStatus, DocumentSummary, DocumentType,
    PDF_CONTENT_TYPE, UploadUrl, s3_location, staging_key,
};
use crate::stores::{DocumentStore, ObjectStore, RetireRequest};
use crate::validation::{validate_lloyd_george_file_set, validate_nhs_number};

/// A current document with a short-lived link to its content.
#[derive(Debug, Clone)]
pub struct DocumentDownload {
    pub document: DocumentReference,
    pub url: String,
}

pub struct DocumentReferenceService<D, O> {
    pub config: Config,
    pub documents: D,
    pub objects: O,
}

impl<D, O> DocumentReferenceService<D, O>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    pub fn new(config: Config, documents: D, objects: O) -> Self {
        Self { config, documents, objects }
    }

    fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.config.presigned_url_expiry_seconds)
    }

    /// Writes a preliminary row per file and returns where each file should be uploaded.
    pub async fn create_document_references(
        &self,
        request: CreateDocumentReferenceRequest,
        uploader_ods_code: &str,
    ) -> Result<Vec<UploadUrl>, DocumentReferenceError> {
        let nhs_number = validate_nhs_number(&request.patient_id)?;
        let document_type: DocumentType = request.doc_type.parse()?;
        if request.files.is_empty() {
            return Err(ValidationError::NoFiles.into());
        }

        // A Lloyd George upload is one record made of every file in the set
        let shared_record_id = match document_type {
            DocumentType::LloydGeorge => {
                if let Some(file) = request.files.iter().find(|f| f.content_type != PDF_CONTENT_TYPE) {
                    return Err(ValidationError::UnsupportedContentType {
                        file_name: file.file_name.clone(),
                        content_type: file.content_type.clone(),
                    }
                    .into());
                }
                let names: Vec<&str> = request.files.iter().map(|f| f.file_name.as_str()).collect();
                validate_lloyd_george_file_set(&names, &nhs_number)?;
                Some(uuid::Uuid::new_v4().to_string())
            }
            DocumentType::AccessRequestForm => None,
        };

        let now = Utc::now();
        let mut written: Vec<String> = Vec::with_capacity(request.files.len());
        let mut upload_urls = Vec::with_capacity(request.files.len());

        for file in &request.files {
            let id = uuid::Uuid::new_v4().to_string();
            let key = staging_key(&nhs_number, &id);
            let document = DocumentReference {
                id: id.clone(),
                nhs_number: nhs_number.clone(),
                document_type,
                record_id: shared_record_id.clone().unwrap_or_else(|| id.clone()),
                file_name: file.file_name.clone(),
                content_type: file.content_type.clone(),
                file_location: s3_location(&self.config.staging_bucket, &key),
                file_size: None,
                s3_version_id: None,
                status: DocumentStatus::Preliminary,
                virus_scanner_result: None,
                current_gp_ods_code: uploader_ods_code.to_string(),
                created: now,
                last_updated: now,
                deleted: None,
                ttl: None,
            };

            if let Err(e) = self.documents.put_document(&document).await {
                self.remove_rows(&written).await;
                return Err(e.into());
            }
            written.push(id.clone());

            let url = match self
                .objects
                .presign_put(&self.config.staging_bucket, &key, &document.content_type, self.url_expiry())
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    self.remove_rows(&written).await;
                    return Err(e.into());
                }
            };
            upload_urls.push(UploadUrl { document_id: id, file_name: file.file_name.clone(), url });
        }

        info!(
            nhs_number = %nhs_number,
            document_type = %document_type,
            documents = upload_urls.len(),
            "Created preliminary document references"
        );
        Ok(upload_urls)
    }

    async fn remove_rows(&self, ids: &[String]) {
        for id in ids {
            if let Err(e) = self.documents.delete_document(id).await {
                error!(document_id = %id, error = %e, "Failed to remove document reference after a failed create");
            }
        }
    }

    /// Documents of the patient's current records, newest first.
    pub async fn search_document_references(
        &self,
        nhs_number: &str,
        document_type: Option<DocumentType>,
    ) -> Result<Vec<DocumentSummary>, DocumentReferenceError> {
        let nhs_number = validate_nhs_number(nhs_number)?;
        let types = match document_type {
            Some(document_type) => vec![document_type],
            None => vec![DocumentType::LloydGeorge, DocumentType::AccessRequestForm],
        };

        let mut documents = Vec::new();
        for document_type in types {
            let Some(marker) = self.documents.current_final_record(&nhs_number, document_type).await? else {
                continue;
            };
            for id in &marker.document_ids {
                if let Some(document) = self.documents.get_document(id).await?
                    && document.is_current()
                    && marker.holds(&document)
                {
                    documents.push(document);
                }
            }
        }
        documents.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.file_name.cmp(&b.file_name)));

        Ok(documents.iter().map(DocumentSummary::from).collect())
    }

    /// A document is downloadable only while it belongs to its patient's current record.
    pub async fn get_document_reference(&self, id: &str) -> Result<DocumentDownload, DocumentReferenceError> {
        let not_found = || DocumentReferenceError::NotFound(format!("document {}", id));

        let document = self
            .documents
            .get_document(id)
            .await?
            .filter(DocumentReference::is_current)
            .ok_or_else(not_found)?;

        let marker = self
            .documents
            .current_final_record(&document.nhs_number, document.document_type)
            .await?;
        if !marker.is_some_and(|m| m.holds(&document)) {
            return Err(not_found());
        }

        let (bucket, key) = document
            .location()
            .ok_or_else(|| StoreError::NotFound(format!("file location of document {}", id)))?;
        let url = self.objects.presign_get(bucket, key, self.url_expiry()).await?;

        Ok(DocumentDownload { document, url })
    }

    /// Retires the patient's current record of the given type. Returns the ids of
    /// the documents that were deleted.
    pub async fn delete_document_references(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
    ) -> Result<Vec<String>, DocumentReferenceError> {
        let nhs_number = validate_nhs_number(nhs_number)?;

        let marker = self
            .documents
            .current_final_record(&nhs_number, document_type)
            .await?
            .ok_or_else(|| DocumentReferenceError::NotFound(format!("{} record for patient", document_type)))?;

        let now = Utc::now();
        let ttl = (now + chrono::Duration::days(self.config.deleted_document_retention_days)).timestamp();
        let request = RetireRequest {
            nhs_number: nhs_number.clone(),
            document_type,
            record_id: marker.current_record_id.clone(),
            version: marker.version,
            document_ids: marker.document_ids.clone(),
            deleted_at: now,
            ttl,
        };

        match self.documents.retire_final_record(&request).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed(reason)) => {
                return Err(DocumentReferenceError::Conflict(format!(
                    "record changed while it was being deleted: {}",
                    reason
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            nhs_number = %nhs_number,
            record_id = %marker.current_record_id,
            documents = marker.document_ids.len(),
            "Record deleted"
        );
        Ok(marker.document_ids)
    }
}
