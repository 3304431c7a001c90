//! HTTP utilities for request/response handling and CORS

use lambda_http::{Body, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// CORS origin header for all responses
pub fn get_cors_origin_header() -> (&'static str, &'static str) {
    ("Access-Control-Allow-Origin", "*")
}

/// Full CORS headers for OPTIONS preflight responses only
pub fn get_cors_preflight_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Access-Control-Allow-Origin", "*"),
        (
            "Access-Control-Allow-Headers",
            "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token,If-Modified-Since",
        ),
        ("Access-Control-Allow-Methods", "GET,POST,DELETE,OPTIONS"),
        ("Access-Control-Max-Age", "86400"),
    ]
}

fn json_response(status: u16, body: String) -> Response<Body> {
    let (key, value) = get_cors_origin_header();
    Response::builder()
        .status(status)
        .header(key, value)
        .header("Content-Type", "application/json")
        .body(body.into())
        .unwrap_or_else(|_| {
            let mut fallback = Response::new(Body::Empty);
            *fallback.status_mut() = lambda_http::http::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

/// Build an error response with consistent formatting
pub fn error_response(status: u16, error: &str, details: &str, suggestion: Option<&str>) -> Response<Body> {
    let mut body = json!({
        "error": error,
        "details": details,
    });

    if let Some(suggestion) = suggestion {
        body["suggestion"] = json!(suggestion);
    }

    json_response(status, body.to_string())
}

/// Build a successful response with CORS headers
pub fn success_response(status: u16, body: &str) -> Response<Body> {
    json_response(status, body.to_string())
}

/// Handle CORS preflight requests
pub fn handle_options() -> Response<Body> {
    let mut response = Response::builder().status(200);

    for (key, value) in get_cors_preflight_headers() {
        response = response.header(key, value);
    }

    response
        .header("Content-Type", "application/json")
        .body(Body::Empty)
        .unwrap_or_else(|_| Response::new(Body::Empty))
}

pub fn parse_json_body(body: &Body) -> Result<Value, Response<Body>> {
    let body_str = match body {
        Body::Empty => "{}",
        Body::Text(s) => s,
        Body::Binary(b) => match std::str::from_utf8(b) {
            Ok(s) => s,
            Err(_) => {
                return Err(error_response(400, "Invalid request body", "Could not parse request body as UTF-8", None));
            }
        },
        _ => "{}",
    };

    serde_json::from_str(body_str)
        .map_err(|_| error_response(400, "Invalid JSON", "Could not parse request body as JSON", None))
}

/// Parses the whole body into a typed request.
pub fn parse_request_body<T>(body: &Body) -> Result<T, Response<Body>>
where
    T: DeserializeOwned,
{
    let json = parse_json_body(body)?;
    serde_json::from_value(json).map_err(|e| error_response(400, "Invalid request body", &e.to_string(), None))
}
