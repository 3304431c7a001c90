//! In-memory stand-ins for the AWS-backed stores. They enforce the same conditions
//! as the DynamoDB and S3 implementations so the services can be tested end to end.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Barrier;

use crate::config::Config;
use crate::error::{PdsError, StoreError};
use crate::models::{
    BulkUploadReport, CLAIMED_MARKER_VERSION, DocumentReference, DocumentStatus, DocumentType, FinalRecordMarker, MetadataFile,
    PDF_CONTENT_TYPE, PatientDetails, ScanResult, StagingMetadata, final_record_marker_id, s3_location, staging_key,
};
use crate::stores::{
    DocumentStore, FinalizeRequest, MessageQueue, ObjectInfo, ObjectStore, PatientLookup, ReportStore, RetireRequest,
};

pub const NHS_NUMBER: &str = "9000000009";
pub const OTHER_NHS_NUMBER: &str = "9449305552";
pub const ODS_CODE: &str = "Y12345";
pub const STAGING_BUCKET: &str = "staging-bulk-store";
pub const RECORD_BUCKET: &str = "lloyd-george-store";

pub fn test_config() -> Config {
    Config {
        lloyd_george_table: "LloydGeorgeReferenceMetadata".to_string(),
        bulk_upload_report_table: Some("BulkUploadReport".to_string()),
        staging_bucket: STAGING_BUCKET.to_string(),
        lloyd_george_bucket: RECORD_BUCKET.to_string(),
        metadata_queue_url: Some("https://sqs.eu-west-2.amazonaws.com/000000000000/metadata".to_string()),
        pds_endpoint: Some("https://pds.example.nhs.uk".to_string()),
        pds_access_token: None,
        pds_timeout_seconds: 10,
        scan_result_tag_key: "scan-result".to_string(),
        presigned_url_expiry_seconds: 1800,
        max_scan_retries: 15,
        requeue_delay_seconds: 60,
        deleted_document_retention_days: 56,
        suspended_ods_codes: vec![],
    }
}

/// A document row as the create endpoint writes it, waiting for its scan.
pub fn preliminary_document(id: &str, record_id: &str, nhs_number: &str, document_type: DocumentType) -> DocumentReference {
    let now = Utc::now();
    DocumentReference {
        id: id.to_string(),
        nhs_number: nhs_number.to_string(),
        document_type,
        record_id: record_id.to_string(),
        file_name: format!("{}.pdf", id),
        content_type: PDF_CONTENT_TYPE.to_string(),
        file_location: s3_location(STAGING_BUCKET, &staging_key(nhs_number, id)),
        file_size: None,
        s3_version_id: None,
        status: DocumentStatus::Preliminary,
        virus_scanner_result: None,
        current_gp_ods_code: ODS_CODE.to_string(),
        created: now,
        last_updated: now,
        deleted: None,
        ttl: None,
    }
}

pub fn final_document(id: &str, record_id: &str, nhs_number: &str, document_type: DocumentType) -> DocumentReference {
    DocumentReference {
        file_location: s3_location(RECORD_BUCKET, &format!("{}/{}", nhs_number, id)),
        status: DocumentStatus::Final,
        virus_scanner_result: Some(ScanResult::Clean),
        file_size: Some(1024),
        ..preliminary_document(id, record_id, nhs_number, document_type)
    }
}

pub fn lloyd_george_file_name(file_number: u32, total: u32) -> String {
    format!(
        "{}of{}_Lloyd_George_Record_[Jane Smith]_[{}]_[22-10-2010].pdf",
        file_number, total, NHS_NUMBER
    )
}

/// Staging metadata for a complete Lloyd George set of `total` files.
pub fn lloyd_george_metadata(total: u32) -> StagingMetadata {
    let files = (1..=total)
        .map(|n| MetadataFile {
            file_path: format!("{}/{}", NHS_NUMBER, lloyd_george_file_name(n, total)),
            page_count: Some(3),
            gp_practice_code: ODS_CODE.to_string(),
            nhs_number: NHS_NUMBER.to_string(),
            section: Some("LG".to_string()),
            sub_section: None,
            scan_date: Some("03/09/2022".to_string()),
            scan_id: Some("NEC".to_string()),
            user_id: Some("NEC".to_string()),
            upload_date: Some("04/09/2022".to_string()),
        })
        .collect();
    StagingMetadata { nhs_number: NHS_NUMBER.to_string(), files, retries: 0 }
}

pub fn registered_patient() -> PatientDetails {
    PatientDetails {
        nhs_number: NHS_NUMBER.to_string(),
        given_names: vec!["Jane".to_string()],
        family_name: "Smith".to_string(),
        birth_date: chrono::NaiveDate::from_ymd_opt(2010, 10, 22),
        general_practice_ods: Some(ODS_CODE.to_string()),
        restricted: false,
    }
}

// Document store

#[derive(Default)]
struct DocumentState {
    documents: HashMap<String, DocumentReference>,
    markers: HashMap<String, FinalRecordMarker>,
    puts: usize,
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<DocumentState>,
    finalize_barrier: Option<Arc<Barrier>>,
    fail_put_after: Option<usize>,
    fail_finalize: bool,
    fail_deletes: bool,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every finalisation waits on the barrier before committing, so concurrent
    /// callers all observe the marker before any of them moves it.
    pub fn with_finalize_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.finalize_barrier = Some(barrier);
        self
    }

    /// `put_document` fails once `count` documents have been written.
    pub fn failing_puts_after(mut self, count: usize) -> Self {
        self.fail_put_after = Some(count);
        self
    }

    /// `finalize_and_supersede` fails with a non-conditional store error.
    pub fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    /// `delete_document` and `release_final_record` always fail.
    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn insert(&self, document: DocumentReference) {
        locked(&self.state).documents.insert(document.id.clone(), document);
    }

    /// Points the marker at `record_id`, listing the final documents already
    /// inserted for it.
    pub fn set_marker(&self, nhs_number: &str, document_type: DocumentType, record_id: &str) {
        let mut state = locked(&self.state);
        let mut document_ids: Vec<String> = state
            .documents
            .values()
            .filter(|d| {
                d.nhs_number == nhs_number
                    && d.document_type == document_type
                    && d.record_id == record_id
                    && d.status == DocumentStatus::Final
            })
            .map(|d| d.id.clone())
            .collect();
        document_ids.sort();

        let marker_id = final_record_marker_id(nhs_number, document_type);
        let version = state.markers.get(&marker_id).map_or(1, |m| m.version + 1);
        state.markers.insert(
            marker_id.clone(),
            FinalRecordMarker {
                id: marker_id,
                current_record_id: record_id.to_string(),
                document_ids,
                version,
                last_updated: Utc::now(),
            },
        );
    }

    pub fn marker(&self, nhs_number: &str, document_type: DocumentType) -> Option<String> {
        self.marker_entry(nhs_number, document_type).map(|m| m.current_record_id)
    }

    pub fn marker_entry(&self, nhs_number: &str, document_type: DocumentType) -> Option<FinalRecordMarker> {
        locked(&self.state).markers.get(&final_record_marker_id(nhs_number, document_type)).cloned()
    }

    pub fn document(&self, id: &str) -> Option<DocumentReference> {
        locked(&self.state).documents.get(id).cloned()
    }

    pub fn all(&self) -> Vec<DocumentReference> {
        locked(&self.state).documents.values().cloned().collect()
    }

    pub fn with_status(&self, nhs_number: &str, status: DocumentStatus) -> Vec<DocumentReference> {
        let mut docs: Vec<DocumentReference> = locked(&self.state)
            .documents
            .values()
            .filter(|d| d.nhs_number == nhs_number && d.status == status)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }
}

fn check_status(state: &DocumentState, id: &str, expected: DocumentStatus) -> Result<(), StoreError> {
    match state.documents.get(id) {
        Some(doc) if doc.status == expected => Ok(()),
        Some(doc) => Err(StoreError::ConditionFailed(format!("{} is {}", id, doc.status.as_str()))),
        None => Err(StoreError::ConditionFailed(format!("{} does not exist", id))),
    }
}

impl DocumentStore for InMemoryDocumentStore {
    async fn put_document(&self, document: &DocumentReference) -> Result<(), StoreError> {
        let mut state = locked(&self.state);
        if let Some(limit) = self.fail_put_after
            && state.puts >= limit
        {
            return Err(StoreError::DynamoDb("injected put failure".to_string()));
        }
        if state.documents.contains_key(&document.id) {
            return Err(StoreError::ConditionFailed(format!("document {} already exists", document.id)));
        }
        state.puts += 1;
        state.documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentReference>, StoreError> {
        Ok(self.document(id))
    }

    async fn delete_document(&self, id: &str) -> Result<(), StoreError> {
        if self.fail_deletes {
            return Err(StoreError::DynamoDb("injected delete failure".to_string()));
        }
        locked(&self.state).documents.remove(id);
        Ok(())
    }

    async fn current_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
    ) -> Result<Option<FinalRecordMarker>, StoreError> {
        Ok(self.marker_entry(nhs_number, document_type))
    }

    async fn claim_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
        record_id: &str,
        document_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = locked(&self.state);
        let marker_id = final_record_marker_id(nhs_number, document_type);
        if state.markers.contains_key(&marker_id) {
            return Err(StoreError::ConditionFailed(format!("patient already has a final {} record", document_type)));
        }
        state.markers.insert(
            marker_id.clone(),
            FinalRecordMarker {
                id: marker_id,
                current_record_id: record_id.to_string(),
                document_ids: document_ids.to_vec(),
                version: CLAIMED_MARKER_VERSION,
                last_updated: at,
            },
        );
        Ok(())
    }

    async fn release_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
        record_id: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        if self.fail_deletes {
            return Err(StoreError::DynamoDb("injected delete failure".to_string()));
        }
        let mut state = locked(&self.state);
        let marker_id = final_record_marker_id(nhs_number, document_type);
        match state.markers.get(&marker_id) {
            Some(marker) if marker.current_record_id == record_id && marker.version == version => {
                state.markers.remove(&marker_id);
                Ok(())
            }
            _ => Err(StoreError::ConditionFailed(format!("marker no longer points at record {}", record_id))),
        }
    }

    async fn finalize_and_supersede(&self, request: &FinalizeRequest) -> Result<(), StoreError> {
        if let Some(barrier) = &self.finalize_barrier {
            barrier.wait().await;
        }
        if self.fail_finalize {
            return Err(StoreError::DynamoDb("injected finalize failure".to_string()));
        }

        let mut state = locked(&self.state);
        let marker_id = final_record_marker_id(&request.nhs_number, request.document_type);

        // Every condition is checked before anything is written
        check_status(&state, &request.document_id, DocumentStatus::Preliminary)?;
        for id in &request.superseded_document_ids {
            check_status(&state, id, DocumentStatus::Final)?;
        }
        let current = state.markers.get(&marker_id).map(|m| (m.current_record_id.clone(), m.version));
        let expected = request
            .expected_marker
            .as_ref()
            .map(|m| (m.current_record_id.clone(), m.version));
        if current != expected {
            return Err(StoreError::ConditionFailed(format!(
                "transaction cancelled: marker is {:?}, expected {:?}",
                current, expected
            )));
        }

        if let Some(doc) = state.documents.get_mut(&request.document_id) {
            doc.status = DocumentStatus::Final;
            doc.file_location = request.file_location.clone();
            doc.virus_scanner_result = Some(request.scan_result);
            doc.last_updated = request.finalized_at;
            if request.file_size.is_some() {
                doc.file_size = request.file_size;
            }
            if request.s3_version_id.is_some() {
                doc.s3_version_id = request.s3_version_id.clone();
            }
        }
        for id in &request.superseded_document_ids {
            if let Some(doc) = state.documents.get_mut(id) {
                doc.status = DocumentStatus::Superseded;
                doc.last_updated = request.finalized_at;
            }
        }
        state.markers.insert(
            marker_id.clone(),
            FinalRecordMarker {
                id: marker_id,
                current_record_id: request.record_id.clone(),
                document_ids: request.record_document_ids.clone(),
                version: request.next_version(),
                last_updated: request.finalized_at,
            },
        );
        Ok(())
    }

    async fn cancel_document(&self, id: &str, scan_result: ScanResult, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = locked(&self.state);
        check_status(&state, id, DocumentStatus::Preliminary)?;
        if let Some(doc) = state.documents.get_mut(id) {
            doc.status = DocumentStatus::Cancelled;
            doc.virus_scanner_result = Some(scan_result);
            doc.last_updated = at;
        }
        Ok(())
    }

    async fn retire_final_record(&self, request: &RetireRequest) -> Result<(), StoreError> {
        let mut state = locked(&self.state);
        let marker_id = final_record_marker_id(&request.nhs_number, request.document_type);

        for id in &request.document_ids {
            check_status(&state, id, DocumentStatus::Final)?;
        }
        match state.markers.get(&marker_id) {
            Some(marker) if marker.current_record_id == request.record_id && marker.version == request.version => {}
            _ => return Err(StoreError::ConditionFailed("transaction cancelled: marker moved".to_string())),
        }

        for id in &request.document_ids {
            if let Some(doc) = state.documents.get_mut(id) {
                doc.status = DocumentStatus::Deprecated;
                doc.deleted = Some(request.deleted_at);
                doc.ttl = Some(request.ttl);
                doc.last_updated = request.deleted_at;
            }
        }
        state.markers.remove(&marker_id);
        Ok(())
    }
}

// Object store

#[derive(Debug, Clone, Default)]
struct StoredObject {
    size: i64,
    tags: HashMap<String, String>,
}

#[derive(Default)]
struct ObjectState {
    objects: HashMap<(String, String), StoredObject>,
    copies: usize,
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    state: Mutex<ObjectState>,
    fail_copy_after: Option<usize>,
    fail_record_deletes: bool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletes in the record bucket fail; staging deletes still work.
    pub fn failing_record_deletes(mut self) -> Self {
        self.fail_record_deletes = true;
        self
    }

    /// `copy_object` fails once `count` objects have been copied.
    pub fn failing_copies_after(mut self, count: usize) -> Self {
        self.fail_copy_after = Some(count);
        self
    }

    pub fn put(&self, bucket: &str, key: &str, size: i64) {
        locked(&self.state)
            .objects
            .insert((bucket.to_string(), key.to_string()), StoredObject { size, tags: HashMap::new() });
    }

    /// Stages an object carrying a scan verdict, as the virus scanner leaves it.
    pub fn put_scanned(&self, bucket: &str, key: &str, scan_result: &str) {
        let mut tags = HashMap::new();
        tags.insert("scan-result".to_string(), scan_result.to_string());
        locked(&self.state)
            .objects
            .insert((bucket.to_string(), key.to_string()), StoredObject { size: 1024, tags });
    }

    pub fn exists(&self, bucket: &str, key: &str) -> bool {
        locked(&self.state).objects.contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn keys_in(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = locked(&self.state)
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl ObjectStore for InMemoryObjectStore {
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<ObjectInfo, StoreError> {
        let mut state = locked(&self.state);
        if let Some(limit) = self.fail_copy_after
            && state.copies >= limit
        {
            return Err(StoreError::S3("injected copy failure".to_string()));
        }
        let source = state
            .objects
            .get(&(source_bucket.to_string(), source_key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("s3://{}/{}", source_bucket, source_key)))?;

        state.copies += 1;
        let version = format!("v{}", state.copies);
        let size = source.size;
        state.objects.insert((dest_bucket.to_string(), dest_key.to_string()), source);
        Ok(ObjectInfo { size: Some(size), version_id: Some(version) })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        if self.fail_record_deletes && bucket == RECORD_BUCKET {
            return Err(StoreError::S3("injected delete failure".to_string()));
        }
        locked(&self.state).objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn object_tag(&self, bucket: &str, key: &str, tag_key: &str) -> Result<Option<String>, StoreError> {
        let state = locked(&self.state);
        let object = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("s3://{}/{}", bucket, key)))?;
        Ok(object.tags.get(tag_key).cloned())
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        Ok(format!("https://{}.s3.amazonaws.com/{}?X-Amz-Expires={}&method=PUT", bucket, key, expires_in.as_secs()))
    }

    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        Ok(format!("https://{}.s3.amazonaws.com/{}?X-Amz-Expires={}", bucket, key, expires_in.as_secs()))
    }
}

// Queue, reports and PDS

#[derive(Default)]
pub struct InMemoryQueue {
    messages: Mutex<Vec<(String, i32)>>,
}

impl InMemoryQueue {
    pub fn sent(&self) -> Vec<(String, i32)> {
        locked(&self.messages).clone()
    }
}

impl MessageQueue for InMemoryQueue {
    async fn send_message(&self, body: &str, delay_seconds: i32) -> Result<(), StoreError> {
        locked(&self.messages).push((body.to_string(), delay_seconds));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryReportStore {
    reports: Mutex<Vec<BulkUploadReport>>,
    unavailable: bool,
    failures_left: Mutex<usize>,
}

impl InMemoryReportStore {
    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }

    /// The first `count` writes fail, later ones succeed.
    pub fn failing_first(count: usize) -> Self {
        Self { failures_left: Mutex::new(count), ..Self::default() }
    }

    pub fn reports(&self) -> Vec<BulkUploadReport> {
        locked(&self.reports).clone()
    }
}

impl ReportStore for InMemoryReportStore {
    async fn put_report(&self, report: &BulkUploadReport) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::DynamoDb("report table unavailable".to_string()));
        }
        {
            let mut failures_left = locked(&self.failures_left);
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(StoreError::DynamoDb("throttled".to_string()));
            }
        }
        locked(&self.reports).push(report.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct StubPatientLookup {
    patients: HashMap<String, PatientDetails>,
    unavailable: bool,
}

impl StubPatientLookup {
    pub fn with_patient(patient: PatientDetails) -> Self {
        let mut patients = HashMap::new();
        patients.insert(patient.nhs_number.clone(), patient);
        Self { patients, unavailable: false }
    }

    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }
}

impl PatientLookup for StubPatientLookup {
    async fn patient_details(&self, nhs_number: &str) -> Result<PatientDetails, PdsError> {
        if self.unavailable {
            return Err(PdsError::Unexpected(503));
        }
        self.patients
            .get(nhs_number)
            .cloned()
            .ok_or_else(|| PdsError::PatientNotFound(nhs_number.to_string()))
    }
}
