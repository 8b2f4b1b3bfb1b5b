use crate::error::ValidationError;

/// Canonical form used as the subscription key: trimmed and lowercased.
/// Nodes report addresses in lowercase, so checksummed input must be folded.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Validate that an address is a 20-byte hex Ethereum address
pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| ValidationError::InvalidAddress(format!("{} is missing the 0x prefix", trimmed)))?;

    if digits.len() != 40 {
        return Err(ValidationError::InvalidAddress(format!(
            "Address must be 40 hex characters long, got {}",
            digits.len()
        )));
    }

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidAddress(
            "Address contains non-hexadecimal characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("  0xF977814e90dA44bFA03b6295A0616a897441aceC "),
            "0xf977814e90da44bfa03b6295a0616a897441acec"
        );
        assert_eq!(normalize_address("0xA"), "0xa");
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("0xf977814e90da44bfa03b6295a0616a897441acec").is_ok());
        assert!(validate_address("0XF977814E90DA44BFA03B6295A0616A897441ACEC").is_ok());

        assert!(validate_address("f977814e90da44bfa03b6295a0616a897441acec").is_err());
        assert!(validate_address("0x1234").is_err());
        assert!(validate_address("0xg977814e90da44bfa03b6295a0616a897441acec").is_err());
        assert!(validate_address("").is_err());
    }
}
