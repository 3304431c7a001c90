use crate::error::ValidationError;
use crate::models::PatientDetails;
use crate::validation::lloyd_george::LloydGeorgeFileName;

/// Checks the patient named in a Lloyd George file set against their PDS record.
pub fn validate_patient_matches(
    file: &LloydGeorgeFileName,
    patient: &PatientDetails,
    uploader_ods_code: &str,
    suspended_ods_codes: &[String],
) -> Result<(), ValidationError> {
    if patient.restricted {
        return Err(ValidationError::PatientRestricted);
    }

    if patient.birth_date != Some(file.date_of_birth) {
        return Err(ValidationError::PatientDateOfBirthMismatch);
    }

    if !names_match(&file.patient_name, patient) {
        return Err(ValidationError::PatientNameMismatch);
    }

    if patient.general_practice_ods.is_none()
        && !suspended_ods_codes.iter().any(|c| c.eq_ignore_ascii_case(uploader_ods_code))
    {
        return Err(ValidationError::PatientNotRegistered);
    }

    Ok(())
}

/// The file name must start with the first given name and end with the family name.
fn names_match(file_name_patient: &str, patient: &PatientDetails) -> bool {
    let file_tokens = tokens(file_name_patient);
    let family = tokens(&patient.family_name);
    let first_given = patient.given_names.first().map(|g| tokens(g)).unwrap_or_default();

    if family.is_empty() || first_given.is_empty() {
        return false;
    }
    if file_tokens.len() < family.len() + first_given.len() {
        return false;
    }

    file_tokens.starts_with(&first_given) && file_tokens.ends_with(&family)
}

fn tokens(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
