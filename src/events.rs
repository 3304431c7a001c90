//! Adapters from the SQS and S3 Lambda events to the ingestion services.
use aws_lambda_events::event::s3::S3Event;
use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent};
use tracing::{error, info, warn};

use crate::error::{BulkUploadError, UploadError};
use crate::services::{BulkUploadService, UploadDocumentReferenceService, UploadOutcome};
use crate::stores::{DocumentStore, MessageQueue, ObjectStore, PatientLookup, ReportStore};

/// Processes every record in order. Records whose processing failed are reported
/// back so that only they are redelivered; malformed bodies are dropped since a
/// retry cannot fix them.
pub async fn handle_sqs_event<D, O, P, Q, R>(
    event: SqsEvent,
    service: &BulkUploadService<D, O, P, Q, R>,
) -> SqsBatchResponse
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
    P: PatientLookup + Sync,
    Q: MessageQueue + Sync,
    R: ReportStore + Sync,
{
    let mut response = SqsBatchResponse::default();

    for record in event.records {
        let message_id = record.message_id.unwrap_or_default();
        let Some(body) = record.body else {
            warn!(message_id = %message_id, "SQS record without a body, skipping");
            continue;
        };

        match service.handle_sqs_message(&body).await {
            Ok(outcome) => info!(message_id = %message_id, outcome = ?outcome, "Processed staging metadata"),
            Err(e) if !is_retryable(&e) => {
                error!(message_id = %message_id, error = %e, "Discarding malformed staging metadata");
            }
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Failed to process staging metadata");
                let mut failure = BatchItemFailure::default();
                failure.item_identifier = message_id;
                response.batch_item_failures.push(failure);
            }
        }
    }

    response
}

/// Only a body that could not be parsed is dropped; every other failure is redelivered.
fn is_retryable(error: &BulkUploadError) -> bool {
    !matches!(error, BulkUploadError::InvalidMessage(_))
}

/// Object keys in S3 notifications are URL-encoded with `+` for spaces.
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .unwrap_or(spaced)
}

/// Finalises or rejects every object in the notification. All records are
/// attempted; if any failed the last error is returned so the invocation is retried.
pub async fn handle_s3_event<D, O>(
    event: S3Event,
    service: &UploadDocumentReferenceService<D, O>,
) -> Result<Vec<UploadOutcome>, UploadError>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    let mut outcomes = Vec::new();
    let mut last_error = None;

    for record in event.records {
        let Some(raw_key) = record.s3.object.key else {
            warn!("S3 record without an object key, skipping");
            continue;
        };
        let key = decode_object_key(&raw_key);

        match service.handle_upload(&key).await {
            Ok(outcome) => {
                info!(key = %key, outcome = ?outcome, "Processed uploaded document");
                outcomes.push(outcome);
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to process uploaded document");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok(outcomes),
    }
}
