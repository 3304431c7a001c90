//! Bulk upload report table.
use std::collections::HashMap;
use std::future::Future;

use aws_sdk_dynamodb::{Client, types::AttributeValue};

use crate::error::StoreError;
use crate::models::BulkUploadReport;

pub trait ReportStore {
    fn put_report(&self, report: &BulkUploadReport) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Clone)]
pub struct DynamoReportStore {
    client: Client,
    table_name: String,
}

impl DynamoReportStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self { client, table_name: table_name.into() }
    }
}

impl ReportStore for DynamoReportStore {
    async fn put_report(&self, report: &BulkUploadReport) -> Result<(), StoreError> {
        let item: HashMap<String, AttributeValue> = serde_dynamo::to_item(report)?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| StoreError::DynamoDb(format!("Failed to write bulk upload report: {:?}", e)))?;
        Ok(())
    }
}
