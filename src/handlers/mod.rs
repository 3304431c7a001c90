//! Handler modules for the document reference API

pub mod document_reference;

// Re-export handler functions for convenience
pub use document_reference::{
    document_reference_error, handle_create_document_references, handle_delete_document_references,
    handle_get_document_reference, handle_search_document_references,
};
