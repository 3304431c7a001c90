//! Access to the managed services the handlers orchestrate. Each concern is a trait
//! with one AWS-backed implementation; the services only see the traits.

pub mod document_store;
pub mod object_store;
pub mod pds;
pub mod queue;
pub mod report_store;

pub use document_store::{DocumentStore, DynamoDocumentStore, FinalizeRequest, RetireRequest};
pub use object_store::{ObjectInfo, ObjectStore, S3ObjectStore};
pub use pds::{PatientLookup, PdsClient};
pub use queue::{MessageQueue, SqsQueue};
pub use report_store::{DynamoReportStore, ReportStore};
