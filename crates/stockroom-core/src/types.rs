//! # Domain Records
//!
//! Column payloads for every managed table. Primary keys are NOT part of
//! these structs: identity lives on the row entity that wraps a record, so a
//! record can be built before the database has assigned its key.
//!
//! ## Record Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Table          Key                    Record                           │
//! │  ─────────────  ─────────────────────  ─────────────────────────────    │
//! │  customers      generated INTEGER      Customer { name, kind, ... }     │
//! │  discounts      generated INTEGER      Discount { name, percent_bps }   │
//! │  rates          currency code TEXT     ConversionRate { rate_micros }   │
//! │  blanks         stock number INTEGER   Blank { blank_type, status }     │
//! │  transactions   generated INTEGER      Transaction { blank, amount }    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every record implements `Default`: a row entity that has only been
//! referenced by key (a stub) carries the zero-valued record until loaded.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::RATE_SCALE;

// =============================================================================
// Customer
// =============================================================================

/// Account category of a customer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerKind {
    /// Walk-in or occasional customer.
    #[default]
    Regular,
    /// Account holder eligible for a discount plan.
    Valued,
}

impl CustomerKind {
    /// Column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerKind::Regular => "regular",
            CustomerKind::Valued => "valued",
        }
    }
}

impl fmt::Display for CustomerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CustomerKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(CustomerKind::Regular),
            "valued" => Ok(CustomerKind::Valued),
            other => Err(CoreError::UnknownVariant {
                kind: "customer kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A customer account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Display name.
    pub name: String,

    /// Contact e-mail address.
    pub email: Option<String>,

    /// Account category.
    pub kind: CustomerKind,

    /// Discount plan applied to valued customers (FK to discounts).
    pub discount_id: Option<i64>,

    /// When the account was opened.
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Creates a regular customer opened now.
    pub fn new(name: impl Into<String>) -> Self {
        Customer {
            name: name.into(),
            email: None,
            kind: CustomerKind::Regular,
            discount_id: None,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Discount
// =============================================================================

/// A named discount plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    /// Plan name shown in the customer editor.
    pub name: String,

    /// Discount in basis points (250 = 2.5%).
    pub percent_bps: i64,
}

impl Discount {
    pub fn new(name: impl Into<String>, percent_bps: i64) -> Self {
        Discount {
            name: name.into(),
            percent_bps,
        }
    }

    /// Applies the discount to an amount in minor units, rounding half up.
    pub fn apply(&self, amount_minor: i64) -> i64 {
        let off = (amount_minor as i128 * self.percent_bps as i128 + 5_000) / 10_000;
        amount_minor - off as i64
    }
}

// =============================================================================
// Conversion Rate
// =============================================================================

/// Exchange rate from a foreign currency into the base currency.
///
/// Keyed by ISO 4217 code in the rates table. The rate is fixed point with
/// [`RATE_SCALE`] so no floating point reaches the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRate {
    /// Base-currency minor units per foreign minor unit, times `RATE_SCALE`.
    pub rate_micros: i64,

    /// When the rate was last entered.
    pub updated_at: DateTime<Utc>,
}

impl ConversionRate {
    /// Creates a rate entered now.
    pub fn new(rate_micros: i64) -> Self {
        ConversionRate {
            rate_micros,
            updated_at: Utc::now(),
        }
    }

    /// Converts an amount in foreign minor units into base minor units.
    ///
    /// Rounds half away from zero.
    pub fn convert(&self, amount_minor: i64) -> i64 {
        let scaled = amount_minor as i128 * self.rate_micros as i128;
        let half = (RATE_SCALE / 2) as i128;
        let rounded = if scaled >= 0 {
            (scaled + half) / RATE_SCALE as i128
        } else {
            (scaled - half) / RATE_SCALE as i128
        };
        rounded as i64
    }
}

// =============================================================================
// Blank
// =============================================================================

/// Lifecycle of a pre-numbered blank (ticket / receipt stock).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlankStatus {
    /// In stock, not yet handed to staff.
    #[default]
    Available,
    /// Handed to a member of staff.
    Assigned,
    /// A sale has been written on it.
    Used,
    /// Cancelled; terminal.
    Void,
}

impl BlankStatus {
    /// Column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlankStatus::Available => "available",
            BlankStatus::Assigned => "assigned",
            BlankStatus::Used => "used",
            BlankStatus::Void => "void",
        }
    }

    /// Whether a blank in this status may move to `next`.
    ///
    /// ```text
    ///  Available ──► Assigned ──► Used ──► Void
    ///      │  ◄────────┘  │                 ▲
    ///      └──────────────┴─────────────────┘
    /// ```
    pub fn can_transition_to(&self, next: BlankStatus) -> bool {
        use BlankStatus::*;
        matches!(
            (self, next),
            (Available, Assigned)
                | (Available, Used)
                | (Available, Void)
                | (Assigned, Available)
                | (Assigned, Used)
                | (Assigned, Void)
                | (Used, Void)
        )
    }
}

impl fmt::Display for BlankStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlankStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(BlankStatus::Available),
            "assigned" => Ok(BlankStatus::Assigned),
            "used" => Ok(BlankStatus::Used),
            "void" => Ok(BlankStatus::Void),
            other => Err(CoreError::UnknownVariant {
                kind: "blank status",
                value: other.to_string(),
            }),
        }
    }
}

/// A numbered blank. The stock number is the (client-supplied) key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blank {
    /// Blank type code printed on the stock (e.g. 444, 201).
    pub blank_type: i64,

    /// Current lifecycle status.
    pub status: BlankStatus,

    /// Staff member holding the blank.
    pub assigned_to: Option<String>,
}

impl Blank {
    pub fn new(blank_type: i64) -> Self {
        Blank {
            blank_type,
            status: BlankStatus::Available,
            assigned_to: None,
        }
    }

    /// Moves the blank to `next`, enforcing [`BlankStatus::can_transition_to`].
    pub fn transition(&mut self, next: BlankStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidBlankTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// How a sale was paid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    #[default]
    Cash,
    Card,
}

impl PaymentKind {
    /// Column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Cash => "cash",
            PaymentKind::Card => "card",
        }
    }
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentKind::Cash),
            "card" => Ok(PaymentKind::Card),
            other => Err(CoreError::UnknownVariant {
                kind: "payment kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A sale written against one blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Stock number of the blank used (FK to blanks).
    pub blank_id: i64,

    /// Paying customer, if on account (FK to customers).
    pub customer_id: Option<i64>,

    /// Amount in the sale currency's minor units.
    pub amount_minor: i64,

    /// ISO 4217 code of the sale currency.
    pub currency: String,

    /// Amount converted into base minor units at sale time.
    pub base_amount_minor: i64,

    /// Payment method.
    pub payment: PaymentKind,

    /// External reference printed on the receipt.
    pub reference: String,

    /// When the sale was recorded.
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_conversion_rounds_half_away_from_zero() {
        let rate = ConversionRate::new(1_500_000);
        assert_eq!(rate.convert(3), 5); // 4.5 → 5
        assert_eq!(rate.convert(-3), -5);
        assert_eq!(rate.convert(0), 0);

        let identity = ConversionRate::new(RATE_SCALE);
        assert_eq!(identity.convert(12_345), 12_345);
    }

    #[test]
    fn test_discount_apply() {
        let discount = Discount::new("Valued 2.5%", 250);
        assert_eq!(discount.apply(10_000), 9_750);
        assert_eq!(Discount::default().apply(999), 999);
    }

    #[test]
    fn test_blank_transitions() {
        let mut blank = Blank::new(444);
        blank.transition(BlankStatus::Assigned).unwrap();
        blank.transition(BlankStatus::Used).unwrap();

        let err = blank.transition(BlankStatus::Available).unwrap_err();
        assert!(matches!(err, CoreError::InvalidBlankTransition { .. }));
        assert_eq!(blank.status, BlankStatus::Used);

        blank.transition(BlankStatus::Void).unwrap();
        assert!(!BlankStatus::Void.can_transition_to(BlankStatus::Available));
    }

    #[test]
    fn test_enum_column_round_trip() {
        for status in [
            BlankStatus::Available,
            BlankStatus::Assigned,
            BlankStatus::Used,
            BlankStatus::Void,
        ] {
            assert_eq!(status.as_str().parse::<BlankStatus>().unwrap(), status);
        }
        assert!("lost".parse::<BlankStatus>().is_err());
        assert!("cheque".parse::<PaymentKind>().is_err());
        assert_eq!("valued".parse::<CustomerKind>().unwrap(), CustomerKind::Valued);
    }

    #[test]
    fn test_record_serializes_enum_lowercase() {
        let json = serde_json::to_string(&Blank::new(201)).unwrap();
        assert!(json.contains("\"status\":\"available\""));
    }
}
