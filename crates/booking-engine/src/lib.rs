//! # booking-engine
//!
//! Deterministic session booking for providers and their counterparties.
//!
//! A provider publishes session rates and coarse availability windows; the
//! engine turns those into exact, collision-free start times, matches a
//! chosen rate against prepaid course sessions and gifted tokens, and
//! commits a booking so that no slot is double-booked and no credit is
//! spent twice.
//!
//! ## Modules
//!
//! - [`slots`] — window + duration + cooldown → valid start times (pure)
//! - [`rate`] — session rates and the provider's rate catalog
//! - [`availability`] — the provider's open windows
//! - [`ledger`] — course and token balances, two-phase debit
//! - [`store`] — append-only booking records
//! - [`committer`] — per-provider slot listing and the atomic commit
//! - [`engine`] — read-only queries and the commit entry point
//! - [`wizard`] — rate → slot → confirmation state machine
//! - [`time`] — minute-of-day helpers and the provider-local "now"
//! - [`config`] — engine configuration
//! - [`error`] — Error types

pub mod availability;
pub mod committer;
pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod rate;
pub mod slots;
pub mod store;
pub mod time;
pub mod wizard;

pub use availability::{AvailabilityStore, AvailabilityWindow};
pub use committer::{Admission, AvailableSlot, BookingCommitter, CommitRequest};
pub use config::EngineConfig;
pub use engine::{BookingEngine, ProviderSnapshot, Snapshot};
pub use error::BookingError;
pub use ids::{BookingId, CounterpartyId, CourseBookingId, CourseId, ProviderId, RateId, TokenId};
pub use ledger::{
    CourseBooking, CoursePackage, CourseStatus, CreditLedger, CreditSource, CreditSources,
    PaymentSource, ProBonoToken, ReservationHandle, TokenStatus,
};
pub use rate::{Modality, RateCatalog, SessionRate};
pub use slots::compute_start_times;
pub use store::{Booking, BookingStatus, BookingStore, InMemoryBookingStore};
pub use time::{format_minutes, parse_minutes, LocalNow, WeekStartDay};
pub use wizard::{BookingWizard, RateChoice, RateFilter, WizardCommand, WizardState};
