//! The operations each Lambda exposes, written against the store traits.

pub mod bulk_upload;
pub mod document_reference;
pub mod upload_document_reference;

pub use bulk_upload::{BulkUploadOutcome, BulkUploadService};
pub use document_reference::{DocumentDownload, DocumentReferenceService};
pub use upload_document_reference::{UploadDocumentReferenceService, UploadOutcome};
