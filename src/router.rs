//! Path and method dispatch for the document reference API.
use lambda_http::{Body, Request, RequestExt, Response};
use serde_json::Value;

use crate::auth::{Operation, authorize};
use crate::handlers::{
    handle_create_document_references, handle_delete_document_references, handle_get_document_reference,
    handle_search_document_references,
};
use crate::http::{error_response, handle_options, parse_request_body, success_response};
use crate::models::CreateDocumentReferenceRequest;
use crate::services::DocumentReferenceService;
use crate::stores::{DocumentStore, ObjectStore};

const DOCUMENT_REFERENCE_PREFIX: &str = "/DocumentReference/";

/// Handle the Lambda event
pub async fn handle_lambda_event<D, O>(event: Request, service: &DocumentReferenceService<D, O>) -> Response<Body>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    let method = event.method().as_str();
    let path = event.uri().path();

    // Strip /Prod or /prod prefix if it exists
    let path = path
        .strip_prefix("/Prod")
        .or_else(|| path.strip_prefix("/prod"))
        .unwrap_or(path);

    // Handle CORS preflight requests
    if method == "OPTIONS" {
        return handle_options();
    }

    match route(&event, method, path, service).await {
        Ok(body) => success_response(200, &body.to_string()),
        Err(response) => response,
    }
}

async fn route<D, O>(
    event: &Request,
    method: &str,
    path: &str,
    service: &DocumentReferenceService<D, O>,
) -> Result<Value, Response<Body>>
where
    D: DocumentStore + Sync,
    O: ObjectStore + Sync,
{
    let query = event.query_string_parameters();

    match (method, path) {
        ("POST", "/DocumentReference") => {
            let caller = authorize(event, Operation::Upload)?;
            let req: CreateDocumentReferenceRequest = parse_request_body(event.body())?;
            handle_create_document_references(req, &caller, service).await
        }
        ("GET", "/SearchDocumentReferences") => {
            authorize(event, Operation::View)?;
            let patient_id = required_parameter(query.first("patientId"), "patientId")?;
            handle_search_document_references(patient_id, query.first("docType"), service).await
        }
        ("DELETE", "/DocumentDelete") => {
            authorize(event, Operation::Delete)?;
            let patient_id = required_parameter(query.first("patientId"), "patientId")?;
            let doc_type = required_parameter(query.first("docType"), "docType")?;
            handle_delete_document_references(patient_id, doc_type, service).await
        }
        ("GET", _) if path.starts_with(DOCUMENT_REFERENCE_PREFIX) => {
            authorize(event, Operation::View)?;
            match path.strip_prefix(DOCUMENT_REFERENCE_PREFIX) {
                Some(id) if !id.is_empty() && !id.contains('/') => handle_get_document_reference(id, service).await,
                _ => Err(error_response(404, "Not found", path, None)),
            }
        }
        _ => Err(error_response(
            405,
            "Method not allowed",
            path,
            Some("You're sending a request that doesn't exist."),
        )),
    }
}

fn required_parameter<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, Response<Body>> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        error_response(
            400,
            &format!("Missing {}", name),
            &format!("Query parameter '{}' is required", name),
            None,
        )
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use base64::{Engine as _, engine::general_purpose};
    use serde_json::json;

    use super::*;
    use crate::models::{DocumentStatus, DocumentType, PDF_CONTENT_TYPE};
    use crate::testing::{
        InMemoryDocumentStore, InMemoryObjectStore, NHS_NUMBER, ODS_CODE, final_document, lloyd_george_file_name,
        test_config,
    };

    type TestService = DocumentReferenceService<InMemoryDocumentStore, InMemoryObjectStore>;

    fn service() -> TestService {
        DocumentReferenceService::new(test_config(), InMemoryDocumentStore::new(), InMemoryObjectStore::new())
    }

    fn bearer(role: &str) -> String {
        let claims = json!({
            "repository_role": role,
            "selected_organisation": {"org_ods_code": ODS_CODE}
        });
        format!("Bearer header.{}.signature", general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string()))
    }

    fn request(method: &str, path: &str, role: Option<&str>, query: &[(&str, &str)], body: Body) -> Request {
        let mut builder = lambda_http::http::Request::builder().method(method).uri(path);
        if let Some(role) = role {
            builder = builder.header("Authorization", bearer(role));
        }
        let parameters: HashMap<String, String> =
            query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        builder.body(body).unwrap().with_query_string_parameters(parameters)
    }

    fn json_body(response: &Response<Body>) -> Value {
        match response.body() {
            Body::Text(text) => serde_json::from_str(text).unwrap(),
            _ => Value::Null,
        }
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let response = handle_lambda_event(request("OPTIONS", "/DocumentReference", None, &[], Body::Empty), &service()).await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key("Access-Control-Allow-Methods"));
    }

    #[tokio::test]
    async fn test_create_then_search_flow() {
        let service = service();
        let body = json!({
            "patientId": NHS_NUMBER,
            "docType": "LG",
            "files": [{"fileName": lloyd_george_file_name(1, 1), "contentType": PDF_CONTENT_TYPE}]
        });

        let response = handle_lambda_event(
            request("POST", "/Prod/DocumentReference", Some("GP_CLINICAL"), &[], Body::Text(body.to_string())),
            &service,
        )
        .await;

        assert_eq!(response.status(), 200);
        let created = json_body(&response);
        assert_eq!(created["documents"].as_array().map(Vec::len), Some(1));
        assert_eq!(service.documents.with_status(NHS_NUMBER, DocumentStatus::Preliminary).len(), 1);

        // Preliminary documents are not searchable
        let response = handle_lambda_event(
            request("GET", "/SearchDocumentReferences", Some("PCSE"), &[("patientId", NHS_NUMBER)], Body::Empty),
            &service,
        )
        .await;
        assert_eq!(response.status(), 200);
        assert_eq!(json_body(&response)["documents"], json!([]));
    }

    #[tokio::test]
    async fn test_role_checks() {
        let service = service();

        let response = handle_lambda_event(
            request("POST", "/DocumentReference", Some("PCSE"), &[], Body::Text("{}".to_string())),
            &service,
        )
        .await;
        assert_eq!(response.status(), 403);

        let response = handle_lambda_event(
            request("GET", "/SearchDocumentReferences", None, &[("patientId", NHS_NUMBER)], Body::Empty),
            &service,
        )
        .await;
        assert_eq!(response.status(), 401);

        let response = handle_lambda_event(
            request(
                "DELETE",
                "/DocumentDelete",
                Some("GP_CLINICAL"),
                &[("patientId", NHS_NUMBER), ("docType", "LG")],
                Body::Empty,
            ),
            &service,
        )
        .await;
        assert_eq!(response.status(), 403);
    }

    #[tokio::test]
    async fn test_get_and_delete_routes() {
        let service = service();
        service.documents.insert(final_document("doc-1", "record-1", NHS_NUMBER, DocumentType::LloydGeorge));
        service.documents.set_marker(NHS_NUMBER, DocumentType::LloydGeorge, "record-1");

        let response = handle_lambda_event(request("GET", "/DocumentReference/doc-1", Some("PCSE"), &[], Body::Empty), &service).await;
        assert_eq!(response.status(), 200);
        assert_eq!(json_body(&response)["id"], "doc-1");

        let response = handle_lambda_event(
            request(
                "DELETE",
                "/DocumentDelete",
                Some("GP_ADMIN"),
                &[("patientId", NHS_NUMBER), ("docType", "LG")],
                Body::Empty,
            ),
            &service,
        )
        .await;
        assert_eq!(response.status(), 200);
        assert_eq!(json_body(&response)["deleted"], json!(["doc-1"]));

        let response = handle_lambda_event(request("GET", "/DocumentReference/doc-1", Some("PCSE"), &[], Body::Empty), &service).await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_delete_conflict_is_409() {
        let service = service();
        let listed = vec!["doc-1".to_string(), "doc-2".to_string()];
        service
            .documents
            .claim_final_record(NHS_NUMBER, DocumentType::LloydGeorge, "record-1", &listed, chrono::Utc::now())
            .await
            .unwrap();
        service.documents.insert(final_document("doc-1", "record-1", NHS_NUMBER, DocumentType::LloydGeorge));

        let response = handle_lambda_event(
            request(
                "DELETE",
                "/DocumentDelete",
                Some("GP_ADMIN"),
                &[("patientId", NHS_NUMBER), ("docType", "LG")],
                Body::Empty,
            ),
            &service,
        )
        .await;

        assert_eq!(response.status(), 409);
        assert_eq!(service.documents.document("doc-1").unwrap().status, DocumentStatus::Final);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let service = service();

        let response = handle_lambda_event(request("GET", "/SearchDocumentReferences", Some("PCSE"), &[], Body::Empty), &service).await;
        assert_eq!(response.status(), 400);

        let response = handle_lambda_event(
            request("POST", "/DocumentReference", Some("GP_ADMIN"), &[], Body::Text("{\"patientId\": 1}".to_string())),
            &service,
        )
        .await;
        assert_eq!(response.status(), 400);

        let response = handle_lambda_event(request("PUT", "/DocumentReference", Some("GP_ADMIN"), &[], Body::Empty), &service).await;
        assert_eq!(response.status(), 405);
    }
}
