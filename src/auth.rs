//! Authorization and permission checking utilities

use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose};
use lambda_http::{Body, Request, Response};
use serde_json::Value;

use crate::http::error_response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryRole {
    GpAdmin,
    GpClinical,
    Pcse,
}

impl FromStr for RepositoryRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GP_ADMIN" => Ok(RepositoryRole::GpAdmin),
            "GP_CLINICAL" => Ok(RepositoryRole::GpClinical),
            "PCSE" => Ok(RepositoryRole::Pcse),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    View,
    Delete,
}

/// Who is calling, as asserted by the session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub role: RepositoryRole,
    pub ods_code: Option<String>,
}

/// Extract the caller from the Authorization header
pub fn get_caller_from_event(event: &Request) -> Option<Caller> {
    // The API Gateway authoriser has already validated the token, so its payload can be trusted
    let auth_str = event.headers().get("Authorization").and_then(|h| h.to_str().ok())?;
    let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str);
    caller_from_claims(&parse_jwt_payload(token)?)
}

fn caller_from_claims(claims: &Value) -> Option<Caller> {
    let role = claims.get("repository_role")?.as_str()?.parse().ok()?;
    let ods_code = claims
        .get("selected_organisation")
        .and_then(|org| org.get("org_ods_code"))
        .and_then(|code| code.as_str())
        .map(|code| code.to_string());
    Some(Caller { role, ods_code })
}

/// Helper to decode and parse JWT payload (without validation)
fn parse_jwt_payload(token: &str) -> Option<Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    // JWT payload is the second part, base64url with or without padding
    let payload_part = parts[1];
    let padding = match payload_part.len() % 4 {
        2 => "==",
        3 => "=",
        _ => "",
    };
    let padded_payload = format!("{}{}", payload_part, padding);

    match general_purpose::URL_SAFE_NO_PAD
        .decode(payload_part)
        .or_else(|_| general_purpose::URL_SAFE.decode(&padded_payload))
    {
        Ok(decoded) => serde_json::from_slice(&decoded).ok(),
        Err(_) => None,
    }
}

pub fn is_permitted(role: RepositoryRole, operation: Operation) -> bool {
    match operation {
        Operation::View => true,
        Operation::Upload => matches!(role, RepositoryRole::GpAdmin | RepositoryRole::GpClinical),
        Operation::Delete => matches!(role, RepositoryRole::GpAdmin | RepositoryRole::Pcse),
    }
}

/// Resolves the caller and checks they may perform `operation`.
pub fn authorize(event: &Request, operation: Operation) -> Result<Caller, Response<Body>> {
    let caller = get_caller_from_event(event).ok_or_else(|| {
        error_response(
            401,
            "Unauthorized",
            "No repository role found in the session token",
            Some("Log in again and select an organisation"),
        )
    })?;

    if !is_permitted(caller.role, operation) {
        return Err(error_response(
            403,
            "Insufficient permissions",
            "Your role does not allow this operation",
            None,
        ));
    }

    Ok(caller)
}
