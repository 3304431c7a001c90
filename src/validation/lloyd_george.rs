//! Lloyd George file naming convention:
//! `{n}of{total}_Lloyd_George_Record_[{Patient Name}]_[{NHS number}]_[{DD-MM-YYYY}].pdf`

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::validation::nhs_number::validate_nhs_number;

const RECORD_MARKER: &str = "Lloyd_George_Record_[";
const FIELD_SEPARATOR: &str = "]_[";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LloydGeorgeFileName {
    pub file_number: u32,
    pub total_files: u32,
    pub patient_name: String,
    pub nhs_number: String,
    pub date_of_birth: NaiveDate,
}

pub fn parse_lloyd_george_file_name(file_name: &str) -> Result<LloydGeorgeFileName, ValidationError> {
    let invalid = || ValidationError::InvalidFileName(file_name.to_string());

    let stem = file_name.strip_suffix("].pdf").ok_or_else(invalid)?;
    let (position, rest) = stem.split_once('_').ok_or_else(invalid)?;
    let (number, total) = position.split_once("of").ok_or_else(invalid)?;
    let file_number = parse_count(number).ok_or_else(invalid)?;
    let total_files = parse_count(total).ok_or_else(invalid)?;

    let fields = rest.strip_prefix(RECORD_MARKER).ok_or_else(invalid)?;
    let mut parts = fields.split(FIELD_SEPARATOR);
    let (Some(patient_name), Some(nhs_number), Some(date_of_birth), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    if patient_name.trim().is_empty() || patient_name.contains(['[', ']']) {
        return Err(invalid());
    }
    if file_number == 0 || file_number > total_files {
        return Err(ValidationError::FileNumberOutOfRange { file_number, total: total_files });
    }

    let nhs_number = validate_nhs_number(nhs_number)?;
    let date_of_birth = NaiveDate::parse_from_str(date_of_birth, "%d-%m-%Y")
        .map_err(|_| ValidationError::InvalidDateOfBirth(date_of_birth.to_string()))?;

    Ok(LloydGeorgeFileName {
        file_number,
        total_files,
        patient_name: patient_name.trim().to_string(),
        nhs_number,
        date_of_birth,
    })
}

fn parse_count(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Validates a complete set of Lloyd George files for one patient and returns
/// the parsed names ordered by file number.
pub fn validate_lloyd_george_file_set(
    file_names: &[&str],
    nhs_number: &str,
) -> Result<Vec<LloydGeorgeFileName>, ValidationError> {
    if file_names.is_empty() {
        return Err(ValidationError::NoFiles);
    }

    let mut parsed = file_names
        .iter()
        .map(|name| parse_lloyd_george_file_name(name))
        .collect::<Result<Vec<_>, _>>()?;

    let first = parsed[0].clone();
    for file in &parsed[1..] {
        if file.total_files != first.total_files {
            return Err(ValidationError::InconsistentFileSet("total number of files"));
        }
        if file.patient_name != first.patient_name {
            return Err(ValidationError::InconsistentFileSet("patient name"));
        }
        if file.nhs_number != first.nhs_number {
            return Err(ValidationError::InconsistentFileSet("NHS number"));
        }
        if file.date_of_birth != first.date_of_birth {
            return Err(ValidationError::InconsistentFileSet("date of birth"));
        }
    }

    if first.nhs_number != nhs_number {
        return Err(ValidationError::NhsNumberMismatch(nhs_number.to_string()));
    }

    let mut seen = HashSet::new();
    for file in &parsed {
        if !seen.insert(file.file_number) {
            return Err(ValidationError::DuplicateFileNumber(file.file_number));
        }
    }
    if parsed.len() != first.total_files as usize {
        return Err(ValidationError::IncompleteFileSet {
            expected: first.total_files,
            found: parsed.len(),
        });
    }

    parsed.sort_by_key(|f| f.file_number);
    Ok(parsed)
}
