//! Shared database utilities and helper traits.
use std::collections::HashMap;

use aws_sdk_dynamodb::{
    operation::transact_write_items::TransactWriteItemsError,
    types::{AttributeValue, builders::UpdateBuilder},
};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StoreError;

/// DynamoDB allows at most 100 actions in one `TransactWriteItems` call.
pub const MAX_TRANSACTION_ITEMS: usize = 100;

pub trait DynamoDbBuilderExt {
    fn expression_values(self, values: HashMap<String, AttributeValue>) -> Self;
}

// UpdateBuilder is the builder used within transactions (Update::builder())
impl DynamoDbBuilderExt for UpdateBuilder {
    fn expression_values(self, values: HashMap<String, AttributeValue>) -> Self {
        values
            .into_iter()
            .fold(self, |builder, (k, v)| builder.expression_attribute_values(k, v))
    }
}

pub fn string_value(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

pub fn number_value(value: i64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub fn string_list_value(values: &[String]) -> AttributeValue {
    AttributeValue::L(values.iter().map(|v| AttributeValue::S(v.clone())).collect())
}

/// Timestamps are stored the same way serde writes `DateTime<Utc>`, so rows written
/// through update expressions still deserialize into the models.
pub fn timestamp_value(at: DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Classifies a failed transaction. A cancelled transaction means one of its
/// condition expressions did not hold; the cancellation reasons are kept for the logs.
pub fn transaction_error(e: aws_sdk_dynamodb::error::SdkError<TransactWriteItemsError>) -> StoreError {
    if let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) = e.as_service_error() {
        let reasons: Vec<String> = cancelled
            .cancellation_reasons()
            .iter()
            .map(|r| r.code().unwrap_or("None").to_string())
            .collect();
        return StoreError::ConditionFailed(format!("transaction cancelled: [{}]", reasons.join(", ")));
    }
    StoreError::DynamoDb(format!("Failed to execute transaction: {:?}", e))
}
