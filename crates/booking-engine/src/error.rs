//! Error types for booking-engine operations.

use chrono::NaiveDate;
use thiserror::Error;

use crate::ids::{BookingId, ProviderId, RateId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("No rate selected")]
    NoRateSelected,

    #[error("No slot selected")]
    NoSlotSelected,

    #[error("Slot {date} {start} for provider '{provider}' is already taken")]
    SlotTaken {
        provider: ProviderId,
        date: NaiveDate,
        start: String,
    },

    #[error("Slot {date} {start} has already started")]
    SlotPassed { date: NaiveDate, start: String },

    #[error("Credit source exhausted: {0}")]
    CreditExhausted(String),

    #[error("Rate '{rate}' is not enabled in any window covering {date} {start}")]
    RateNotEnabledInWindow {
        rate: RateId,
        date: NaiveDate,
        start: String,
    },

    #[error("Unknown rate: '{0}'")]
    UnknownRate(RateId),

    #[error("Unknown provider: '{0}'")]
    UnknownProvider(ProviderId),

    #[error("Unknown credit source: {0}")]
    UnknownCreditSource(String),

    #[error("Credit source mismatch: {0}")]
    CreditSourceMismatch(String),

    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl BookingError {
    /// Whether the caller can recover by refreshing, re-selecting or picking
    /// another payment source. Malformed input is a caller bug and is not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            BookingError::InvalidWindow(_)
                | BookingError::InvalidRate(_)
                | BookingError::InvalidTime(_)
                | BookingError::InvalidTimezone(_)
                | BookingError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
