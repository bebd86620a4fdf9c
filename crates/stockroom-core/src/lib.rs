//! # stockroom-core: Pure Domain Records for Stockroom
//!
//! The column payloads stored by the table layer in `stockroom-db`, and the
//! rules that validate them before they are written.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockroom Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 GUI (external collaborator)                     │   │
//! │  │    Customer list ──► Rate editor ──► Sale entry ──► Backup      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                stockroom-db (controllers, tables)               │   │
//! │  │     TableAccessor<R> ── RowEntity<R> ── Connection (sqlx)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ R = one of these records               │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockroom-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   Customer   Discount   ConversionRate   Blank   Transaction    │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO LOCKING • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Record types (Customer, ConversionRate, Blank, ...)
//! - [`error`] - Domain error types
//! - [`validation`] - Field validation
//!
//! ## Example Usage
//!
//! ```rust
//! use stockroom_core::ConversionRate;
//!
//! // 1 USD = 0.79 GBP, stored as micro-units
//! let rate = ConversionRate::new(790_000);
//! assert_eq!(rate.convert(10_000), 7_900);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Fixed-point scale of [`ConversionRate::rate_micros`].
///
/// A rate of `1_000_000` converts one minor unit into exactly one minor unit.
pub const RATE_SCALE: i64 = 1_000_000;

/// Largest discount expressible in basis points (100%).
pub const MAX_DISCOUNT_BPS: i64 = 10_000;
