//! Input validation shared by the upload paths.

pub mod lloyd_george;
pub mod nhs_number;
pub mod patient;

pub use lloyd_george::{LloydGeorgeFileName, parse_lloyd_george_file_name, validate_lloyd_george_file_set};
pub use nhs_number::validate_nhs_number;
pub use patient::validate_patient_matches;
