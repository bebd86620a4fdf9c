//! # Validation Module
//!
//! Field validation run by the controllers before a record is staged on a
//! locked row entity.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: GUI dialogs                                                   │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Controllers (stockroom-db)                                   │
//! │  └── THIS MODULE: field rules                                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                       │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::MAX_DISCOUNT_BPS;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates and normalizes an ISO 4217 currency code.
///
/// ## Rules
/// - Exactly three ASCII letters
/// - Case-insensitive on input, returned upper-case
///
/// ## Example
/// ```rust
/// use stockroom_core::validation::validate_currency_code;
///
/// assert_eq!(validate_currency_code(" gbp ").unwrap(), "GBP");
/// assert!(validate_currency_code("EURO").is_err());
/// ```
pub fn validate_currency_code(code: &str) -> ValidationResult<String> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "currency".to_string(),
        });
    }

    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            reason: "must be a three-letter ISO 4217 code".to_string(),
        });
    }

    Ok(code.to_ascii_uppercase())
}

/// Validates a display name (customers, discount plans).
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 120 characters
pub fn validate_name(field: &str, name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.chars().count() > 120 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 120,
        });
    }

    Ok(name.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an exchange rate in micro-units.
pub fn validate_rate_micros(rate_micros: i64) -> ValidationResult<()> {
    if rate_micros <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "rate".to_string(),
        });
    }

    Ok(())
}

/// Validates a discount in basis points (0..=10000).
pub fn validate_discount_bps(bps: i64) -> ValidationResult<()> {
    if !(0..=MAX_DISCOUNT_BPS).contains(&bps) {
        return Err(ValidationError::OutOfRange {
            field: "discount".to_string(),
            min: 0,
            max: MAX_DISCOUNT_BPS,
        });
    }

    Ok(())
}

/// Validates a sale amount in minor units.
pub fn validate_amount_minor(amount: i64) -> ValidationResult<()> {
    if amount <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_currency_code() {
        assert_eq!(validate_currency_code("usd").unwrap(), "USD");
        assert!(matches!(
            validate_currency_code("   "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_currency_code("U$D"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("name", "  Ada  ").unwrap(), "Ada");
        assert!(validate_name("name", "").is_err());
        assert!(validate_name("name", &"x".repeat(121)).is_err());
    }

    #[test]
    fn test_numeric_validators() {
        assert!(validate_rate_micros(1).is_ok());
        assert!(validate_rate_micros(0).is_err());

        assert!(validate_discount_bps(0).is_ok());
        assert!(validate_discount_bps(10_000).is_ok());
        assert!(validate_discount_bps(10_001).is_err());
        assert!(validate_discount_bps(-1).is_err());

        assert!(validate_amount_minor(-5).is_err());
    }
}
