//! Document reference handlers.
use lambda_http::{Body, Response};
use serde_json::{Value, json};

use crate::auth::Caller;
use crate::error::{DocumentReferenceError, StoreError, ValidationError};
use crate::http::error_response;
use crate::models::{CreateDocumentReferenceRequest, DocumentSummary, DocumentType};
use crate::services::DocumentReferenceService;
use crate::stores::{DocumentStore, ObjectStore};

/// Maps a service failure to the response the frontend expects.
pub fn document_reference_error(e: DocumentReferenceError) -> Response<Body> {
    match e {
        DocumentReferenceError::Validation(e) => error_response(400, "Invalid request", &e.to_string(), None),
        DocumentReferenceError::NotFound(what) => error_response(404, "Not found", &format!("{} not found", what), None),
        DocumentReferenceError::Conflict(details) => error_response(
            409,
            "Conflict",
            &details,
            Some("The record was changed by another request; refresh and try again"),
        ),
        DocumentReferenceError::Store(StoreError::ConditionFailed(details)) => {
            error_response(409, "Conflict", &details, None)
        }
        DocumentReferenceError::Store(e @ (StoreError::S3(_) | StoreError::Presign(_))) => {
            error_response(502, "Storage Error", &e.to_string(), None)
        }
        DocumentReferenceError::Store(e) => error_response(500, "DynamoDB Error", &e.to_string(), None),
    }
}

/// `docType` is a comma separated list; anything naming both types means no filter.
pub fn parse_doc_type_filter(raw: Option<&str>) -> Result<Option<DocumentType>, Response<Body>> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(None);
    };

    let mut types = raw
        .split(',')
        .map(|t| t.parse::<DocumentType>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| error_response(400, "Invalid docType", &e.to_string(), Some("Use LG, ARF or LG,ARF")))?;
    types.dedup();

    Ok(match types.as_slice() {
        [single] => Some(*single),
        _ => None,
    })
}

/// Creates preliminary document references and returns presigned upload URLs.
///
/// # Database Interactions
/// - **Lloyd George table**: conditional `PutItem` per file (`DocStatus = preliminary`).
/// - **Staging bucket**: presigned `PutObject` URL per file.
pub async fn handle_create_document_references<D, O>(
    req: CreateDocumentReferenceRequest,
    caller: &Caller,
    service: &DocumentReferenceService<D, O>,
) -> Result<Value, Response<Body>>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    let ods_code = caller.ods_code.as_deref().ok_or_else(|| {
        error_response(
            401,
            "Unauthorized",
            "No organisation selected in the session token",
            Some("Select an organisation before uploading"),
        )
    })?;

    let upload_urls = service
        .create_document_references(req, ods_code)
        .await
        .map_err(document_reference_error)?;

    Ok(json!({ "documents": upload_urls }))
}

/// Lists the documents of a patient's current records.
///
/// # Database Interactions
/// - **Lloyd George table**: `GetItem` on each final record marker, then a consistent
///   `GetItem` per document the marker lists.
pub async fn handle_search_document_references<D, O>(
    nhs_number: &str,
    doc_type: Option<&str>,
    service: &DocumentReferenceService<D, O>,
) -> Result<Value, Response<Body>>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    let document_type = parse_doc_type_filter(doc_type)?;
    let documents: Vec<DocumentSummary> = service
        .search_document_references(nhs_number, document_type)
        .await
        .map_err(document_reference_error)?;

    Ok(json!({ "documents": documents }))
}

pub async fn handle_get_document_reference<D, O>(
    id: &str,
    service: &DocumentReferenceService<D, O>,
) -> Result<Value, Response<Body>>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    let download = service.get_document_reference(id).await.map_err(document_reference_error)?;
    let document = download.document;

    Ok(json!({
        "id": document.id,
        "fileName": document.file_name,
        "documentType": document.document_type,
        "contentType": document.content_type,
        "fileSize": document.file_size,
        "created": document.created,
        "url": download.url,
    }))
}

/// Deletes the patient's current record of one type.
///
/// # Database Interactions
/// - **Lloyd George table**: one `TransactWriteItems` moving every document to
///   `deprecated` and deleting the final record marker.
pub async fn handle_delete_document_references<D, O>(
    nhs_number: &str,
    doc_type: &str,
    service: &DocumentReferenceService<D, O>,
) -> Result<Value, Response<Body>>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    let document_type: DocumentType = doc_type
        .parse()
        .map_err(|e: ValidationError| error_response(400, "Invalid docType", &e.to_string(), None))?;

    let deleted = service
        .delete_document_references(nhs_number, document_type)
        .await
        .map_err(document_reference_error)?;

    Ok(json!({ "deleted": deleted }))
}
