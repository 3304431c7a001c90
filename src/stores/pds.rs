//! Personal Demographics Service lookup.
//!
//! Only the fields the ingestion pipeline compares are read from the FHIR `Patient`
//! resource; everything else in the response is ignored.
use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::PdsError;
use crate::models::PatientDetails;

pub trait PatientLookup {
    fn patient_details(&self, nhs_number: &str) -> impl Future<Output = Result<PatientDetails, PdsError>> + Send;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PdsPatient {
    id: String,
    #[serde(default)]
    name: Vec<PdsName>,
    birth_date: Option<String>,
    #[serde(default)]
    general_practitioner: Vec<PdsReference>,
    meta: Option<PdsMeta>,
}

#[derive(Debug, Deserialize)]
struct PdsName {
    #[serde(rename = "use")]
    name_use: Option<String>,
    #[serde(default)]
    given: Vec<String>,
    family: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PdsReference {
    identifier: Option<PdsIdentifier>,
}

#[derive(Debug, Deserialize)]
struct PdsIdentifier {
    value: String,
}

#[derive(Debug, Deserialize)]
struct PdsMeta {
    #[serde(default)]
    security: Vec<PdsCoding>,
}

#[derive(Debug, Deserialize)]
struct PdsCoding {
    code: String,
}

/// Reads a PDS `Patient` resource into the details the pipeline needs.
pub fn parse_patient(body: &str) -> Result<PatientDetails, PdsError> {
    let patient: PdsPatient =
        serde_json::from_str(body).map_err(|e| PdsError::InvalidResponse(e.to_string()))?;

    let name = patient
        .name
        .iter()
        .find(|n| n.name_use.as_deref() == Some("usual"))
        .or_else(|| patient.name.first())
        .ok_or_else(|| PdsError::InvalidResponse("patient has no name".to_string()))?;

    let restricted = patient
        .meta
        .as_ref()
        .map(|m| m.security.iter().any(|s| matches!(s.code.as_str(), "R" | "REDACTED")))
        .unwrap_or(false);

    Ok(PatientDetails {
        nhs_number: patient.id.clone(),
        given_names: name.given.clone(),
        family_name: name.family.clone().unwrap_or_default(),
        birth_date: patient
            .birth_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        general_practice_ods: patient
            .general_practitioner
            .iter()
            .find_map(|gp| gp.identifier.as_ref().map(|i| i.value.clone())),
        restricted,
    })
}

#[derive(Clone)]
pub struct PdsClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl PdsClient {
    /// `timeout` bounds each lookup end to end.
    pub fn new(endpoint: impl Into<String>, access_token: Option<String>, timeout: Duration) -> Result<Self, PdsError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }
}

impl PatientLookup for PdsClient {
    async fn patient_details(&self, nhs_number: &str) -> Result<PatientDetails, PdsError> {
        let url = format!("{}/Patient/{}", self.endpoint, nhs_number);

        let mut request = self
            .http
            .get(&url)
            .header("X-Request-ID", uuid::Uuid::new_v4().to_string())
            .header("Accept", "application/fhir+json");
        if let Some(token) = &self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        match status {
            200 => {
                let body = response.text().await?;
                parse_patient(&body)
            }
            404 => Err(PdsError::PatientNotFound(nhs_number.to_string())),
            400 => {
                let body = response.text().await.unwrap_or_default();
                Err(PdsError::BadRequest(body))
            }
            other => Err(PdsError::Unexpected(other)),
        }
    }
}
