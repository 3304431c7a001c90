//! Lloyd George document table.
use std::collections::HashMap;
use std::future::Future;

use aws_sdk_dynamodb::{
    Client,
    types::{AttributeValue, Delete, Put, TransactWriteItem, Update},
};
use chrono::{DateTime, Utc};

use crate::db_utils::{
    DynamoDbBuilderExt, MAX_TRANSACTION_ITEMS, number_value, string_list_value, string_value, timestamp_value,
    transaction_error,
};
use crate::error::StoreError;
use crate::models::{
    CLAIMED_MARKER_VERSION, DocumentReference, DocumentStatus, DocumentType, FinalRecordMarker, ScanResult,
    final_record_marker_id,
};

/// Promotes a preliminary document to `final` and retires the record it replaces.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub document_id: String,
    pub record_id: String,
    pub nhs_number: String,
    pub document_type: DocumentType,
    pub file_location: String,
    pub file_size: Option<i64>,
    pub s3_version_id: Option<String>,
    pub scan_result: ScanResult,
    /// The marker as the caller read it; `None` when the patient had no final record.
    pub expected_marker: Option<FinalRecordMarker>,
    pub superseded_document_ids: Vec<String>,
    /// Members of the document's record once it is final, this document included.
    pub record_document_ids: Vec<String>,
    pub finalized_at: DateTime<Utc>,
}

impl FinalizeRequest {
    pub fn next_version(&self) -> u64 {
        self.expected_marker.as_ref().map_or(1, |m| m.version + 1)
    }
}

/// Deletes the current final record of a patient.
#[derive(Debug, Clone)]
pub struct RetireRequest {
    pub nhs_number: String,
    pub document_type: DocumentType,
    pub record_id: String,
    /// Marker version the record was read at.
    pub version: u64,
    pub document_ids: Vec<String>,
    pub deleted_at: DateTime<Utc>,
    pub ttl: i64,
}

pub trait DocumentStore {
    /// Inserts a new row; fails with `ConditionFailed` if the id is taken.
    fn put_document(&self, document: &DocumentReference) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_document(&self, id: &str) -> impl Future<Output = Result<Option<DocumentReference>, StoreError>> + Send;

    /// Hard delete, used to roll back rows written by a failed upload.
    fn delete_document(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Strongly consistent read of the final record marker.
    fn current_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
    ) -> impl Future<Output = Result<Option<FinalRecordMarker>, StoreError>> + Send;

    /// Creates the final record marker at version 1 listing `document_ids`; fails
    /// with `ConditionFailed` if the patient already has a final record of this type.
    fn claim_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
        record_id: &str,
        document_ids: &[String],
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes the marker if it is still at `record_id` and `version`.
    fn release_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
        record_id: &str,
        version: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically: the document goes `preliminary -> final`, every listed document goes
    /// `final -> superseded` and the marker moves from the expected version to the
    /// next one, pointing at the document's record. If any condition fails nothing is
    /// written and `ConditionFailed` is returned.
    fn finalize_and_supersede(&self, request: &FinalizeRequest) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// `preliminary -> cancelled`, recording the scan verdict.
    fn cancel_document(
        &self,
        id: &str,
        scan_result: ScanResult,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically moves every document of the record `final -> deprecated`, stamps
    /// the deletion and removes the marker.
    fn retire_final_record(&self, request: &RetireRequest) -> impl Future<Output = Result<(), StoreError>> + Send;
}

fn version_value(version: u64) -> AttributeValue {
    AttributeValue::N(version.to_string())
}

#[derive(Clone)]
pub struct DynamoDocumentStore {
    client: Client,
    table_name: String,
}

impl DynamoDocumentStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self { client, table_name: table_name.into() }
    }

    fn status_update(
        &self,
        id: &str,
        from: DocumentStatus,
        to: DocumentStatus,
        at: DateTime<Utc>,
    ) -> aws_sdk_dynamodb::types::builders::UpdateBuilder {
        let mut values = HashMap::new();
        values.insert(":from".to_string(), string_value(from.as_str()));
        values.insert(":to".to_string(), string_value(to.as_str()));
        values.insert(":lu".to_string(), timestamp_value(at));

        Update::builder()
            .table_name(&self.table_name)
            .key("ID", string_value(id))
            .update_expression("SET DocStatus = :to, LastUpdated = :lu")
            .condition_expression("DocStatus = :from")
            .expression_values(values)
    }
}

impl DocumentStore for DynamoDocumentStore {
    async fn put_document(&self, document: &DocumentReference) -> Result<(), StoreError> {
        let item: HashMap<String, AttributeValue> = serde_dynamo::to_item(document)?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(ID)")
            .send()
            .await
            .map_err(|e| {
                if let Some(service_err) = e.as_service_error()
                    && service_err.is_conditional_check_failed_exception()
                {
                    return StoreError::ConditionFailed(format!("document {} already exists", document.id));
                }
                StoreError::DynamoDb(format!("Failed to put document reference: {:?}", e))
            })?;

        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentReference>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("ID", string_value(id))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(format!("Failed to get document reference: {:?}", e)))?;

        match output.item {
            Some(item) => Ok(Some(serde_dynamo::from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("ID", string_value(id))
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(format!("Failed to delete document reference {}: {:?}", id, e)))?;
        Ok(())
    }

    async fn current_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
    ) -> Result<Option<FinalRecordMarker>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("ID", string_value(final_record_marker_id(nhs_number, document_type)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(format!("Failed to read final record marker: {:?}", e)))?;

        match output.item {
            Some(item) => Ok(Some(serde_dynamo::from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn claim_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
        record_id: &str,
        document_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let marker = FinalRecordMarker {
            id: final_record_marker_id(nhs_number, document_type),
            current_record_id: record_id.to_string(),
            document_ids: document_ids.to_vec(),
            version: CLAIMED_MARKER_VERSION,
            last_updated: at,
        };
        let item: HashMap<String, AttributeValue> = serde_dynamo::to_item(&marker)?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(ID)")
            .send()
            .await
            .map_err(|e| {
                if let Some(service_err) = e.as_service_error()
                    && service_err.is_conditional_check_failed_exception()
                {
                    return StoreError::ConditionFailed(format!(
                        "patient already has a final {} record",
                        document_type
                    ));
                }
                StoreError::DynamoDb(format!("Failed to claim final record marker: {:?}", e))
            })?;

        Ok(())
    }

    async fn release_final_record(
        &self,
        nhs_number: &str,
        document_type: DocumentType,
        record_id: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("ID", string_value(final_record_marker_id(nhs_number, document_type)))
            .condition_expression("CurrentRecordId = :rid AND #version = :ver")
            .expression_attribute_names("#version", "Version")
            .expression_attribute_values(":rid", string_value(record_id))
            .expression_attribute_values(":ver", version_value(version))
            .send()
            .await
            .map_err(|e| {
                if let Some(service_err) = e.as_service_error()
                    && service_err.is_conditional_check_failed_exception()
                {
                    return StoreError::ConditionFailed(format!("marker no longer points at record {}", record_id));
                }
                StoreError::DynamoDb(format!("Failed to release final record marker: {:?}", e))
            })?;

        Ok(())
    }

    async fn finalize_and_supersede(&self, request: &FinalizeRequest) -> Result<(), StoreError> {
        let item_count = request.superseded_document_ids.len() + 2;
        if item_count > MAX_TRANSACTION_ITEMS {
            return Err(StoreError::TooManyItems(item_count));
        }

        let mut transact_items = Vec::with_capacity(item_count);

        // 1. The new document
        let mut set_parts = vec![
            "DocStatus = :final",
            "FileLocation = :loc",
            "VirusScannerResult = :scan",
            "LastUpdated = :lu",
        ];
        let mut values = HashMap::new();
        values.insert(":final".to_string(), string_value(DocumentStatus::Final.as_str()));
        values.insert(":preliminary".to_string(), string_value(DocumentStatus::Preliminary.as_str()));
        values.insert(":loc".to_string(), string_value(&request.file_location));
        values.insert(":scan".to_string(), string_value(request.scan_result.as_str()));
        values.insert(":lu".to_string(), timestamp_value(request.finalized_at));
        if let Some(size) = request.file_size {
            set_parts.push("FileSize = :size");
            values.insert(":size".to_string(), number_value(size));
        }
        if let Some(version) = &request.s3_version_id {
            set_parts.push("S3VersionId = :ver");
            values.insert(":ver".to_string(), string_value(version));
        }

        let promote = Update::builder()
            .table_name(&self.table_name)
            .key("ID", string_value(&request.document_id))
            .update_expression(format!("SET {}", set_parts.join(", ")))
            .condition_expression("DocStatus = :preliminary")
            .expression_values(values)
            .build()
            .map_err(|e| StoreError::DynamoDb(format!("Failed to build finalize update: {:?}", e)))?;
        transact_items.push(TransactWriteItem::builder().update(promote).build());

        // 2. Documents of the record being replaced
        for id in &request.superseded_document_ids {
            let supersede = self
                .status_update(id, DocumentStatus::Final, DocumentStatus::Superseded, request.finalized_at)
                .build()
                .map_err(|e| StoreError::DynamoDb(format!("Failed to build supersede update for {}: {:?}", id, e)))?;
            transact_items.push(TransactWriteItem::builder().update(supersede).build());
        }

        // 3. Marker: optimistic lock on the version the caller observed. Sibling
        // files of one record bump it too, so no finalisation works from a stale list.
        let marker_id = final_record_marker_id(&request.nhs_number, request.document_type);
        let marker_item = match &request.expected_marker {
            Some(expected) => {
                let mut values = HashMap::new();
                values.insert(":new".to_string(), string_value(&request.record_id));
                values.insert(":ids".to_string(), string_list_value(&request.record_document_ids));
                values.insert(":next".to_string(), version_value(request.next_version()));
                values.insert(":expected".to_string(), string_value(&expected.current_record_id));
                values.insert(":ver".to_string(), version_value(expected.version));
                values.insert(":lu".to_string(), timestamp_value(request.finalized_at));
                let update = Update::builder()
                    .table_name(&self.table_name)
                    .key("ID", string_value(&marker_id))
                    .update_expression(
                        "SET CurrentRecordId = :new, DocumentIds = :ids, #version = :next, LastUpdated = :lu",
                    )
                    .condition_expression("CurrentRecordId = :expected AND #version = :ver")
                    .expression_attribute_names("#version", "Version")
                    .expression_values(values)
                    .build()
                    .map_err(|e| StoreError::DynamoDb(format!("Failed to build marker update: {:?}", e)))?;
                TransactWriteItem::builder().update(update).build()
            }
            None => {
                let put = Put::builder()
                    .table_name(&self.table_name)
                    .item("ID", string_value(&marker_id))
                    .item("CurrentRecordId", string_value(&request.record_id))
                    .item("DocumentIds", string_list_value(&request.record_document_ids))
                    .item("Version", version_value(request.next_version()))
                    .item("LastUpdated", timestamp_value(request.finalized_at))
                    .condition_expression("attribute_not_exists(ID)")
                    .build()
                    .map_err(|e| StoreError::DynamoDb(format!("Failed to build marker put: {:?}", e)))?;
                TransactWriteItem::builder().put(put).build()
            }
        };
        transact_items.push(marker_item);

        self.client
            .transact_write_items()
            .set_transact_items(Some(transact_items))
            .send()
            .await
            .map_err(transaction_error)?;

        Ok(())
    }

    async fn cancel_document(&self, id: &str, scan_result: ScanResult, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("ID", string_value(id))
            .update_expression("SET DocStatus = :cancelled, VirusScannerResult = :scan, LastUpdated = :lu")
            .condition_expression("DocStatus = :preliminary")
            .expression_attribute_values(":cancelled", string_value(DocumentStatus::Cancelled.as_str()))
            .expression_attribute_values(":preliminary", string_value(DocumentStatus::Preliminary.as_str()))
            .expression_attribute_values(":scan", string_value(scan_result.as_str()))
            .expression_attribute_values(":lu", timestamp_value(at))
            .send()
            .await
            .map_err(|e| {
                if let Some(service_err) = e.as_service_error()
                    && service_err.is_conditional_check_failed_exception()
                {
                    return StoreError::ConditionFailed(format!("document {} is no longer preliminary", id));
                }
                StoreError::DynamoDb(format!("Failed to cancel document reference: {:?}", e))
            })?;

        Ok(())
    }

    async fn retire_final_record(&self, request: &RetireRequest) -> Result<(), StoreError> {
        let item_count = request.document_ids.len() + 1;
        if item_count > MAX_TRANSACTION_ITEMS {
            return Err(StoreError::TooManyItems(item_count));
        }

        let mut transact_items = Vec::with_capacity(item_count);
        for id in &request.document_ids {
            let mut values = HashMap::new();
            values.insert(":deleted".to_string(), timestamp_value(request.deleted_at));
            values.insert(":ttl".to_string(), number_value(request.ttl));

            // TTL is a reserved word
            let retire = self
                .status_update(id, DocumentStatus::Final, DocumentStatus::Deprecated, request.deleted_at)
                .update_expression("SET DocStatus = :to, LastUpdated = :lu, Deleted = :deleted, #ttl = :ttl")
                .expression_attribute_names("#ttl", "TTL")
                .expression_values(values)
                .build()
                .map_err(|e| StoreError::DynamoDb(format!("Failed to build retire update for {}: {:?}", id, e)))?;
            transact_items.push(TransactWriteItem::builder().update(retire).build());
        }

        let remove_marker = Delete::builder()
            .table_name(&self.table_name)
            .key("ID", string_value(final_record_marker_id(&request.nhs_number, request.document_type)))
            .condition_expression("CurrentRecordId = :rid AND #version = :ver")
            .expression_attribute_names("#version", "Version")
            .expression_attribute_values(":rid", string_value(&request.record_id))
            .expression_attribute_values(":ver", version_value(request.version))
            .build()
            .map_err(|e| StoreError::DynamoDb(format!("Failed to build marker delete: {:?}", e)))?;
        transact_items.push(TransactWriteItem::builder().delete(remove_marker).build());

        self.client
            .transact_write_items()
            .set_transact_items(Some(transact_items))
            .send()
            .await
            .map_err(transaction_error)?;

        Ok(())
    }
}
