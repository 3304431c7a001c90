use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid NHS number: {0}")]
    InvalidNhsNumber(String),

    #[error("unsupported document type: {0}")]
    UnsupportedDocumentType(String),

    #[error("file name does not match the Lloyd George naming convention: {0}")]
    InvalidFileName(String),

    #[error("file {file_number} of {total} is out of range")]
    FileNumberOutOfRange { file_number: u32, total: u32 },

    #[error("files in the set disagree on {0}")]
    InconsistentFileSet(&'static str),

    #[error("file set is incomplete: expected {expected} files, found {found}")]
    IncompleteFileSet { expected: u32, found: usize },

    #[error("duplicate file number {0} in set")]
    DuplicateFileNumber(u32),

    #[error("NHS number in file names does not match {0}")]
    NhsNumberMismatch(String),

    #[error("invalid date of birth in file name: {0}")]
    InvalidDateOfBirth(String),

    #[error("unsupported content type {content_type} for {file_name}")]
    UnsupportedContentType { file_name: String, content_type: String },

    #[error("no files provided")]
    NoFiles,

    #[error("patient name does not match PDS")]
    PatientNameMismatch,

    #[error("patient date of birth does not match PDS")]
    PatientDateOfBirthMismatch,

    #[error("patient record is restricted")]
    PatientRestricted,

    #[error("patient is not registered at a GP practice")]
    PatientNotRegistered,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write or transaction was rejected by its condition.
    #[error("condition failed: {0}")]
    ConditionFailed(String),

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_dynamo::Error),

    #[error("DynamoDB error: {0}")]
    DynamoDb(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("SQS error: {0}")]
    Sqs(String),

    #[error("S3 presign error: {0}")]
    Presign(String),

    #[error("transaction too large: {0} items")]
    TooManyItems(usize),
}

#[derive(Debug, Error)]
pub enum PdsError {
    #[error("patient {0} not found in PDS")]
    PatientNotFound(String),

    #[error("PDS rejected the request: {0}")]
    BadRequest(String),

    #[error("PDS request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("PDS returned status {0}")]
    Unexpected(u16),

    #[error("PDS response could not be read: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum BulkUploadError {
    #[error("invalid staging metadata message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("failed to encode staging metadata: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to record bulk upload report: {0}")]
    Report(#[source] StoreError),

    #[error("failed to requeue staging metadata: {0}")]
    Requeue(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unrecognised staging object key: {0}")]
    InvalidObjectKey(String),

    #[error("document reference {0} not found")]
    NotFound(String),

    #[error("virus scan result for {0} is not available yet")]
    ScanPending(String),

    #[error("document {document_id} conflicts with a concurrent finalisation: {reason}")]
    Conflict { document_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum DocumentReferenceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
