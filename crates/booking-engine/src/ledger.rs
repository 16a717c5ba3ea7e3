//! Prepaid-course and gifted-token balances.
//!
//! The ledger answers "which credit sources could pay for this rate?" and
//! debits exactly one source per committed booking. Purchase and gifting
//! flows feed entries in through [`CreditLedger::record_course`] and
//! [`CreditLedger::grant_token`]; nothing in the core ever adds credit back.
//!
//! Debiting is two-phase. [`CreditLedger::reserve`] validates a source and
//! hands out a [`ReservationHandle`] without touching balances;
//! [`CreditLedger::commit`] re-validates under the write lock and mutates.
//! A handle is consumed by either `commit` or [`CreditLedger::release`], so a
//! single reservation can never debit twice.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};
use crate::ids::{CounterpartyId, CourseBookingId, CourseId, ProviderId, RateId, TokenId};

// ── Courses ─────────────────────────────────────────────────────────────────

/// A multi-session package a provider sells for one rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePackage {
    pub id: CourseId,
    pub provider_id: ProviderId,
    pub rate_id: RateId,
    pub total_sessions: u32,
    pub total_price: u64,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    Active,
    Completed,
    Cancelled,
}

/// A counterparty's purchased instance of a [`CoursePackage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseBooking {
    pub id: CourseBookingId,
    pub counterparty_id: CounterpartyId,
    pub provider_id: ProviderId,
    pub course_id: CourseId,
    pub rate_id: RateId,
    pub total_sessions: u32,
    pub sessions_used: u32,
    pub status: CourseStatus,
}

impl CourseBooking {
    /// A fresh, unused course booking for `package`.
    pub fn from_package(
        id: CourseBookingId,
        counterparty_id: CounterpartyId,
        package: &CoursePackage,
    ) -> Self {
        Self {
            id,
            counterparty_id,
            provider_id: package.provider_id.clone(),
            course_id: package.id.clone(),
            rate_id: package.rate_id.clone(),
            total_sessions: package.total_sessions,
            sessions_used: 0,
            status: CourseStatus::Active,
        }
    }

    pub fn remaining_sessions(&self) -> u32 {
        self.total_sessions.saturating_sub(self.sessions_used)
    }

    /// Active with at least one unused session.
    pub fn is_usable(&self) -> bool {
        self.status == CourseStatus::Active && self.sessions_used < self.total_sessions
    }
}

// ── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Available,
    Used,
    Expired,
}

/// A gifted token authorizing one zero-cost booking of one rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProBonoToken {
    pub id: TokenId,
    pub provider_id: ProviderId,
    pub counterparty_id: CounterpartyId,
    pub rate_id: RateId,
    pub status: TokenStatus,
}

impl ProBonoToken {
    pub fn is_usable(&self) -> bool {
        self.status == TokenStatus::Available
    }
}

// ── Sources ─────────────────────────────────────────────────────────────────

/// A credit source the counterparty picked to pay for a booking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum CreditSource {
    Course(CourseBookingId),
    Token(TokenId),
}

impl fmt::Display for CreditSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditSource::Course(id) => write!(f, "course:{id}"),
            CreditSource::Token(id) => write!(f, "token:{id}"),
        }
    }
}

/// How a committed booking was paid for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PaymentSource {
    /// Capture happens outside the core.
    Cash,
    Course(CourseBookingId),
    Token(TokenId),
}

impl From<CreditSource> for PaymentSource {
    fn from(source: CreditSource) -> Self {
        match source {
            CreditSource::Course(id) => PaymentSource::Course(id),
            CreditSource::Token(id) => PaymentSource::Token(id),
        }
    }
}

/// Credit sources that could pay for one `(counterparty, provider, rate)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSources {
    pub courses: Vec<CourseBooking>,
    pub tokens: Vec<ProBonoToken>,
}

impl CreditSources {
    pub fn is_empty(&self) -> bool {
        self.courses.is_empty() && self.tokens.is_empty()
    }

    pub fn contains(&self, source: &CreditSource) -> bool {
        match source {
            CreditSource::Course(id) => self.courses.iter().any(|c| &c.id == id),
            CreditSource::Token(id) => self.tokens.iter().any(|t| &t.id == id),
        }
    }

    /// Every listed source, courses first.
    pub fn sources(&self) -> Vec<CreditSource> {
        self.courses
            .iter()
            .map(|c| CreditSource::Course(c.id.clone()))
            .chain(self.tokens.iter().map(|t| CreditSource::Token(t.id.clone())))
            .collect()
    }
}

/// A validated, not-yet-applied claim on one credit source.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be committed or released"]
pub struct ReservationHandle {
    source: CreditSource,
    counterparty: CounterpartyId,
    provider: ProviderId,
    rate: RateId,
}

impl ReservationHandle {
    pub fn source(&self) -> &CreditSource {
        &self.source
    }
}

// ── Ledger ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LedgerState {
    courses: BTreeMap<CourseBookingId, CourseBooking>,
    tokens: BTreeMap<TokenId, ProBonoToken>,
}

/// Shared store of every counterparty's course bookings and tokens.
#[derive(Debug, Default)]
pub struct CreditLedger {
    state: RwLock<LedgerState>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger pre-populated with existing entries.
    ///
    /// # Errors
    ///
    /// Fails like [`CreditLedger::record_course`] on an inconsistent course.
    pub fn with_entries(
        courses: impl IntoIterator<Item = CourseBooking>,
        tokens: impl IntoIterator<Item = ProBonoToken>,
    ) -> Result<Self> {
        let ledger = Self::new();
        for course in courses {
            ledger.record_course(course)?;
        }
        for token in tokens {
            ledger.grant_token(token);
        }
        Ok(ledger)
    }

    /// Record a purchased course booking (or replace a top-up of one).
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::CreditSourceMismatch`] if `sessions_used`
    /// exceeds `total_sessions`.
    pub fn record_course(&self, mut course: CourseBooking) -> Result<()> {
        if course.sessions_used > course.total_sessions {
            return Err(BookingError::CreditSourceMismatch(format!(
                "course:{} uses {} of {} sessions",
                course.id, course.sessions_used, course.total_sessions
            )));
        }
        if course.status == CourseStatus::Active && course.sessions_used == course.total_sessions
        {
            course.status = CourseStatus::Completed;
        }
        self.state.write().courses.insert(course.id.clone(), course);
        Ok(())
    }

    /// Record a gifted token.
    pub fn grant_token(&self, token: ProBonoToken) {
        self.state.write().tokens.insert(token.id.clone(), token);
    }

    /// Usable course bookings and tokens for this counterparty, provider and rate.
    ///
    /// Never fails: no credit is an empty result, and the caller falls back
    /// to cash.
    pub fn sources_for(
        &self,
        counterparty: &CounterpartyId,
        provider: &ProviderId,
        rate: &RateId,
    ) -> CreditSources {
        let state = self.state.read();
        CreditSources {
            courses: state
                .courses
                .values()
                .filter(|c| {
                    &c.counterparty_id == counterparty
                        && &c.provider_id == provider
                        && &c.rate_id == rate
                        && c.is_usable()
                })
                .cloned()
                .collect(),
            tokens: state
                .tokens
                .values()
                .filter(|t| {
                    &t.counterparty_id == counterparty
                        && &t.provider_id == provider
                        && &t.rate_id == rate
                        && t.is_usable()
                })
                .cloned()
                .collect(),
        }
    }

    /// Validate `source` for this booking without mutating anything.
    ///
    /// # Errors
    ///
    /// - [`BookingError::UnknownCreditSource`] if the ledger has no such entry
    /// - [`BookingError::CreditSourceMismatch`] if it belongs to a different
    ///   counterparty, provider or rate
    /// - [`BookingError::CreditExhausted`] if it has nothing left to spend
    pub fn reserve(
        &self,
        source: &CreditSource,
        counterparty: &CounterpartyId,
        provider: &ProviderId,
        rate: &RateId,
    ) -> Result<ReservationHandle> {
        let handle = ReservationHandle {
            source: source.clone(),
            counterparty: counterparty.clone(),
            provider: provider.clone(),
            rate: rate.clone(),
        };
        Self::check(&self.state.read(), &handle)?;
        Ok(handle)
    }

    /// Apply a reservation: use one course session or spend the token.
    ///
    /// Eligibility is checked again under the write lock, so two commits
    /// racing for the last session of a course cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::CreditExhausted`] if the source was consumed
    /// since it was reserved.
    pub fn commit(&self, handle: ReservationHandle) -> Result<PaymentSource> {
        let mut state = self.state.write();
        Self::check(&state, &handle)?;

        match &handle.source {
            CreditSource::Course(id) => {
                if let Some(course) = state.courses.get_mut(id) {
                    course.sessions_used += 1;
                    if course.sessions_used == course.total_sessions {
                        course.status = CourseStatus::Completed;
                    }
                    tracing::debug!(
                        course = %id,
                        used = course.sessions_used,
                        total = course.total_sessions,
                        "Course session debited"
                    );
                }
            }
            CreditSource::Token(id) => {
                if let Some(token) = state.tokens.get_mut(id) {
                    token.status = TokenStatus::Used;
                    tracing::debug!(token = %id, "Token spent");
                }
            }
        }
        Ok(handle.source.into())
    }

    /// Drop a reservation that will not be committed. Nothing was mutated.
    pub fn release(&self, handle: ReservationHandle) {
        tracing::trace!(source = %handle.source, "Credit reservation released");
    }

    pub fn course(&self, id: &CourseBookingId) -> Option<CourseBooking> {
        self.state.read().courses.get(id).cloned()
    }

    pub fn token(&self, id: &TokenId) -> Option<ProBonoToken> {
        self.state.read().tokens.get(id).cloned()
    }

    /// Every course booking, ordered by id.
    pub fn courses(&self) -> Vec<CourseBooking> {
        self.state.read().courses.values().cloned().collect()
    }

    /// Every token, ordered by id.
    pub fn tokens(&self) -> Vec<ProBonoToken> {
        self.state.read().tokens.values().cloned().collect()
    }

    fn check(state: &LedgerState, handle: &ReservationHandle) -> Result<()> {
        let (owner, provider, rate, usable) = match &handle.source {
            CreditSource::Course(id) => {
                let c = state
                    .courses
                    .get(id)
                    .ok_or_else(|| BookingError::UnknownCreditSource(handle.source.to_string()))?;
                (&c.counterparty_id, &c.provider_id, &c.rate_id, c.is_usable())
            }
            CreditSource::Token(id) => {
                let t = state
                    .tokens
                    .get(id)
                    .ok_or_else(|| BookingError::UnknownCreditSource(handle.source.to_string()))?;
                (&t.counterparty_id, &t.provider_id, &t.rate_id, t.is_usable())
            }
        };

        if owner != &handle.counterparty || provider != &handle.provider || rate != &handle.rate {
            return Err(BookingError::CreditSourceMismatch(format!(
                "{} is not valid for counterparty '{}', provider '{}', rate '{}'",
                handle.source, handle.counterparty, handle.provider, handle.rate
            )));
        }
        if !usable {
            tracing::warn!(source = %handle.source, "Credit source exhausted");
            return Err(BookingError::CreditExhausted(handle.source.to_string()));
        }
        Ok(())
    }
}
