use crate::error::ValidationError;

/// Normalises and checks an NHS number, returning the bare 10 digits.
///
/// Spaces and hyphens are ignored. The tenth digit is a modulus 11 check digit
/// over the first nine weighted 10 down to 2; a computed check of 10 means the
/// number can never be valid.
pub fn validate_nhs_number(raw: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidNhsNumber(raw.to_string());

    let digits: String = raw.chars().filter(|c| *c != ' ' && *c != '-').collect();
    if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let values: Vec<u32> = digits.bytes().map(|b| u32::from(b - b'0')).collect();
    let weighted: u32 = values[..9]
        .iter()
        .zip((2..=10).rev())
        .map(|(digit, weight)| digit * weight)
        .sum();

    let check = match 11 - (weighted % 11) {
        11 => 0,
        10 => return Err(invalid()),
        c => c,
    };

    if check != values[9] {
        return Err(invalid());
    }

    Ok(digits)
}
