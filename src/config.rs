//! Runtime configuration, resolved once per cold start and passed into services by
//! reference so request handling never reads the process environment.

use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub lloyd_george_table: String,
    pub bulk_upload_report_table: Option<String>,
    pub staging_bucket: String,
    pub lloyd_george_bucket: String,
    pub metadata_queue_url: Option<String>,
    pub pds_endpoint: Option<String>,
    pub pds_access_token: Option<String>,
    pub pds_timeout_seconds: u64,
    pub scan_result_tag_key: String,
    pub presigned_url_expiry_seconds: u64,
    pub max_scan_retries: u32,
    pub requeue_delay_seconds: i32,
    pub deleted_document_retention_days: i64,
    pub suspended_ods_codes: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let optional = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Config {
            lloyd_george_table: required("LLOYD_GEORGE_DYNAMODB_NAME")?,
            bulk_upload_report_table: optional("BULK_UPLOAD_REPORT_DYNAMODB_NAME"),
            staging_bucket: required("STAGING_STORE_BUCKET_NAME")?,
            lloyd_george_bucket: required("LLOYD_GEORGE_BUCKET_NAME")?,
            metadata_queue_url: optional("METADATA_SQS_QUEUE_URL"),
            pds_endpoint: optional("PDS_FHIR_ENDPOINT"),
            pds_access_token: optional("PDS_ACCESS_TOKEN"),
            pds_timeout_seconds: parse_or("PDS_TIMEOUT_SECONDS", optional("PDS_TIMEOUT_SECONDS"), 10)?,
            scan_result_tag_key: optional("SCAN_RESULT_TAG_KEY").unwrap_or_else(|| "scan-result".to_string()),
            presigned_url_expiry_seconds: parse_or("PRESIGNED_URL_EXPIRY_SECONDS", optional("PRESIGNED_URL_EXPIRY_SECONDS"), 1800)?,
            max_scan_retries: parse_or("MAX_SCAN_RETRIES", optional("MAX_SCAN_RETRIES"), 15)?,
            requeue_delay_seconds: parse_or("REQUEUE_DELAY_SECONDS", optional("REQUEUE_DELAY_SECONDS"), 60)?,
            deleted_document_retention_days: parse_or(
                "DELETED_DOCUMENT_RETENTION_DAYS",
                optional("DELETED_DOCUMENT_RETENTION_DAYS"),
                56,
            )?,
            suspended_ods_codes: optional("SUSPENDED_ODS_CODES")
                .map(|codes| {
                    codes
                        .split(',')
                        .map(|c| c.trim().to_uppercase())
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn require_report_table(&self) -> Result<&str, ConfigError> {
        self.bulk_upload_report_table
            .as_deref()
            .ok_or(ConfigError::Missing("BULK_UPLOAD_REPORT_DYNAMODB_NAME"))
    }

    pub fn require_queue_url(&self) -> Result<&str, ConfigError> {
        self.metadata_queue_url
            .as_deref()
            .ok_or(ConfigError::Missing("METADATA_SQS_QUEUE_URL"))
    }

    pub fn require_pds_endpoint(&self) -> Result<&str, ConfigError> {
        self.pds_endpoint.as_deref().ok_or(ConfigError::Missing("PDS_FHIR_ENDPOINT"))
    }
}

fn parse_or<T: FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        None => Ok(default),
    }
}
