use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DocumentType {
    #[serde(rename = "LG")]
    LloydGeorge,
    #[serde(rename = "ARF")]
    AccessRequestForm,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::LloydGeorge => "LG",
            DocumentType::AccessRequestForm => "ARF",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LG" => Ok(DocumentType::LloydGeorge),
            "ARF" => Ok(DocumentType::AccessRequestForm),
            _ => Err(ValidationError::UnsupportedDocumentType(s.to_string())),
        }
    }
}

/// Lifecycle of a stored document.
///
/// `preliminary -> final -> superseded`, `preliminary -> cancelled` and
/// `final -> deprecated` are the only transitions the stores perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Preliminary,
    Final,
    Superseded,
    Cancelled,
    Deprecated,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Preliminary => "preliminary",
            DocumentStatus::Final => "final",
            DocumentStatus::Superseded => "superseded",
            DocumentStatus::Cancelled => "cancelled",
            DocumentStatus::Deprecated => "deprecated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ScanResult {
    Clean,
    Infected,
    Error,
    Unscannable,
    Pending,
}

impl ScanResult {
    /// Interprets the value of the scan-result object tag. A missing tag means the
    /// scanner has not reported yet.
    pub fn from_tag(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return ScanResult::Pending;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "clean" | "no_threats_found" => ScanResult::Clean,
            "infected" | "threats_found" => ScanResult::Infected,
            "unscannable" | "unsupported" => ScanResult::Unscannable,
            "pending" | "" => ScanResult::Pending,
            _ => ScanResult::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanResult::Clean => "Clean",
            ScanResult::Infected => "Infected",
            ScanResult::Error => "Error",
            ScanResult::Unscannable => "Unscannable",
            ScanResult::Pending => "Pending",
        }
    }
}

/// One row of the Lloyd George table; one per stored file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentReference {
    #[serde(rename = "ID")]
    pub id: String,
    pub nhs_number: String,
    pub document_type: DocumentType,
    pub record_id: String,
    pub file_name: String,
    pub content_type: String,
    pub file_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_version_id: Option<String>,
    #[serde(rename = "DocStatus")]
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virus_scanner_result: Option<ScanResult>,
    pub current_gp_ods_code: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl DocumentReference {
    /// A document visible to search and download.
    pub fn is_current(&self) -> bool {
        self.status == DocumentStatus::Final && self.deleted.is_none()
    }

    pub fn location(&self) -> Option<(&str, &str)> {
        parse_s3_location(&self.file_location)
    }
}

pub const USER_UPLOAD_PREFIX: &str = "user_upload";

/// Where a client uploads a document before it is scanned.
pub fn staging_key(nhs_number: &str, document_id: &str) -> String {
    format!("{}/{}/{}", USER_UPLOAD_PREFIX, nhs_number, document_id)
}

/// Splits a staging key back into NHS number and document id.
pub fn parse_staging_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(USER_UPLOAD_PREFIX)?.strip_prefix('/')?;
    let (nhs_number, document_id) = rest.split_once('/')?;
    if nhs_number.is_empty() || document_id.is_empty() || document_id.contains('/') {
        return None;
    }
    Some((nhs_number, document_id))
}

/// Where a finalised document lives in the record bucket.
pub fn record_key(nhs_number: &str, document_id: &str) -> String {
    format!("{}/{}", nhs_number, document_id)
}

pub fn s3_location(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

pub fn parse_s3_location(location: &str) -> Option<(&str, &str)> {
    let rest = location.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

/// Version of a marker freshly created by a claim.
pub const CLAIMED_MARKER_VERSION: u64 = 1;

/// Points at the record that is currently `final` for a patient and document type
/// and lists its documents, so readers never depend on the eventually consistent
/// index. `Version` goes up on every write; each transition of the final record is
/// conditioned on the version it read.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FinalRecordMarker {
    #[serde(rename = "ID")]
    pub id: String,
    pub current_record_id: String,
    #[serde(default)]
    pub document_ids: Vec<String>,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
}

impl FinalRecordMarker {
    pub fn holds(&self, document: &DocumentReference) -> bool {
        self.current_record_id == document.record_id && self.document_ids.contains(&document.id)
    }
}

pub fn final_record_marker_id(nhs_number: &str, document_type: DocumentType) -> String {
    format!("FINAL#{}#{}", document_type.as_str(), nhs_number)
}

// Bulk upload messages

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetadataFile {
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    pub gp_practice_code: String,
    pub nhs_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
}

impl MetadataFile {
    pub fn file_name(&self) -> &str {
        self.file_path.rsplit('/').next().unwrap_or(&self.file_path)
    }
}

/// Body of a bulk upload SQS message: every file staged for one patient.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StagingMetadata {
    pub nhs_number: String,
    pub files: Vec<MetadataFile>,
    #[serde(default)]
    pub retries: u32,
}

impl StagingMetadata {
    pub fn uploader_ods_code(&self) -> &str {
        self.files.first().map(|f| f.gp_practice_code.as_str()).unwrap_or("")
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(MetadataFile::file_name).collect()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.file_path.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Complete,
    Failed,
}

/// Outcome row written for every bulk upload message that reaches a verdict.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BulkUploadReport {
    #[serde(rename = "ID")]
    pub id: String,
    pub nhs_number: String,
    pub upload_status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub file_paths: Vec<String>,
    pub uploader_ods_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pds_ods_code: Option<String>,
    pub date: String,
    pub timestamp: i64,
}

impl BulkUploadReport {
    pub fn complete(metadata: &StagingMetadata, pds_ods_code: Option<String>, now: DateTime<Utc>) -> Self {
        Self::new(metadata, UploadStatus::Complete, None, pds_ods_code, now)
    }

    pub fn failed(
        metadata: &StagingMetadata,
        reason: impl Into<String>,
        pds_ods_code: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(metadata, UploadStatus::Failed, Some(reason.into()), pds_ods_code, now)
    }

    fn new(
        metadata: &StagingMetadata,
        upload_status: UploadStatus,
        failure_reason: Option<String>,
        pds_ods_code: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        BulkUploadReport {
            id: uuid::Uuid::new_v4().to_string(),
            nhs_number: metadata.nhs_number.clone(),
            upload_status,
            failure_reason,
            file_paths: metadata.file_paths(),
            uploader_ods_code: metadata.uploader_ods_code().to_string(),
            pds_ods_code,
            date: now.format("%Y-%m-%d").to_string(),
            timestamp: now.timestamp(),
        }
    }
}

/// The handful of PDS fields the ingestion pipeline compares against.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientDetails {
    pub nhs_number: String,
    pub given_names: Vec<String>,
    pub family_name: String,
    pub birth_date: Option<NaiveDate>,
    pub general_practice_ods: Option<String>,
    pub restricted: bool,
}

// Request Bodies
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileRequest {
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentReferenceRequest {
    pub patient_id: String,
    pub doc_type: String,
    pub files: Vec<UploadFileRequest>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    pub document_id: String,
    pub file_name: String,
    pub url: String,
}

/// Search result entry returned to the frontend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub file_name: String,
    pub document_type: DocumentType,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

impl From<&DocumentReference> for DocumentSummary {
    fn from(doc: &DocumentReference) -> Self {
        DocumentSummary {
            id: doc.id.clone(),
            file_name: doc.file_name.clone(),
            document_type: doc.document_type,
            created: doc.created,
            file_size: doc.file_size,
        }
    }
}
