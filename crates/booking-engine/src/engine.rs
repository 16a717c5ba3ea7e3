//! The engine facade: the read-only queries and the single mutating entry
//! point that collaborators outside the core call.
//!
//! One [`BookingCommitter`] per provider is the ordering point for that
//! provider's slots, so commits for different providers never contend. The
//! [`CreditLedger`] is shared across providers.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::availability::{AvailabilityStore, AvailabilityWindow};
use crate::committer::{AvailableSlot, BookingCommitter, CommitRequest};
use crate::config::EngineConfig;
use crate::error::{BookingError, Result};
use crate::ids::{BookingId, CounterpartyId, ProviderId, RateId};
use crate::ledger::{CourseBooking, CreditLedger, CreditSources, ProBonoToken};
use crate::rate::{RateCatalog, SessionRate};
use crate::store::{Booking, BookingStore, InMemoryBookingStore};
use crate::time::{local_now, LocalNow};

/// Serializable image of everything an engine holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub providers: Vec<ProviderSnapshot>,
    #[serde(default)]
    pub courses: Vec<CourseBooking>,
    #[serde(default)]
    pub tokens: Vec<ProBonoToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub id: ProviderId,
    pub rates: Vec<SessionRate>,
    #[serde(default)]
    pub windows: Vec<AvailabilityWindow>,
    /// Every booking revision, oldest first.
    #[serde(default)]
    pub bookings: Vec<Booking>,
}

pub struct BookingEngine<S = InMemoryBookingStore> {
    config: EngineConfig,
    tz: Tz,
    providers: BTreeMap<ProviderId, BookingCommitter<S>>,
    ledger: CreditLedger,
}

impl BookingEngine<InMemoryBookingStore> {
    /// An engine with no providers and an empty ledger.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_ledger(config, CreditLedger::new())
    }

    /// Register a provider backed by an in-memory booking store.
    pub fn add_provider(
        &mut self,
        catalog: RateCatalog,
        availability: AvailabilityStore,
    ) -> Result<()> {
        self.register(BookingCommitter::new(catalog, availability)?)
    }

    /// Rebuild an engine from a [`Snapshot`].
    ///
    /// # Errors
    ///
    /// Fails on any invalid rate, window or ledger entry, and with
    /// [`BookingError::InvalidConfig`] if a booking is filed under the
    /// wrong provider or overlaps another live booking.
    pub fn from_snapshot(config: EngineConfig, snapshot: Snapshot) -> Result<Self> {
        let ledger = CreditLedger::with_entries(snapshot.courses, snapshot.tokens)?;
        let mut engine = Self::with_ledger(config, ledger)?;

        for provider in snapshot.providers {
            let catalog = RateCatalog::new(provider.id.clone(), provider.rates)?;
            let availability =
                AvailabilityStore::new(provider.id.clone(), provider.windows, &catalog)?;
            let committer = BookingCommitter::new(catalog, availability)?;
            for booking in provider.bookings {
                if booking.provider_id != provider.id {
                    return Err(BookingError::InvalidConfig(format!(
                        "booking {} of '{}' filed under '{}'",
                        booking.id, booking.provider_id, provider.id
                    )));
                }
                committer.restore(booking)?;
            }
            engine.register(committer)?;
        }
        Ok(engine)
    }
}

impl<S: BookingStore> BookingEngine<S> {
    /// An engine with no providers over an existing ledger.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate.
    pub fn with_ledger(config: EngineConfig, ledger: CreditLedger) -> Result<Self> {
        config.validate()?;
        let tz = config.tz()?;
        Ok(Self {
            config,
            tz,
            providers: BTreeMap::new(),
            ledger,
        })
    }

    /// Register a provider's committer.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidConfig`] if the provider is already registered.
    pub fn register(&mut self, committer: BookingCommitter<S>) -> Result<()> {
        let id = committer.provider().clone();
        if self.providers.contains_key(&id) {
            return Err(BookingError::InvalidConfig(format!(
                "provider '{id}' registered twice"
            )));
        }
        tracing::debug!(provider = %id, "Provider registered");
        self.providers.insert(id, committer);
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn committer(&self, provider: &ProviderId) -> Result<&BookingCommitter<S>> {
        self.providers
            .get(provider)
            .ok_or_else(|| BookingError::UnknownProvider(provider.clone()))
    }

    pub fn catalog(&self, provider: &ProviderId) -> Result<&RateCatalog> {
        self.committer(provider).map(BookingCommitter::catalog)
    }

    /// The providers' local date and minute at `now`.
    pub fn local_now(&self, now: DateTime<Utc>) -> LocalNow {
        local_now(now, self.tz)
    }

    /// Open slots for `rate` between `from` and `to` inclusive.
    ///
    /// The range is capped at the configured horizon. Past dates and starts
    /// at or before the current local minute are never offered. No
    /// availability is an empty list, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::UnknownProvider`] or [`BookingError::UnknownRate`].
    pub fn list_available_slots(
        &self,
        provider: &ProviderId,
        rate: &RateId,
        from: NaiveDate,
        to: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<AvailableSlot>> {
        let committer = self.committer(provider)?;
        let horizon_end = from
            .checked_add_days(Days::new(u64::from(self.config.horizon_days) - 1))
            .unwrap_or(NaiveDate::MAX);
        let to = to.min(horizon_end);
        if from > to {
            // Still reject unknown rates for an empty range.
            committer.catalog().require(rate)?;
            return Ok(Vec::new());
        }
        committer.open_slots(rate, from, to, Some(self.local_now(now)))
    }

    /// Credit sources the counterparty could pay for `rate` with.
    pub fn list_credit_sources(
        &self,
        counterparty: &CounterpartyId,
        provider: &ProviderId,
        rate: &RateId,
    ) -> CreditSources {
        self.ledger.sources_for(counterparty, provider, rate)
    }

    /// Commit a booking through the provider's committer. A start at or
    /// before `now` in the providers' local time is refused.
    ///
    /// See [`BookingCommitter::commit`] for the error cases.
    pub fn commit_booking(&self, request: &CommitRequest, now: DateTime<Utc>) -> Result<Booking> {
        self.committer(&request.provider)?
            .commit(request, &self.ledger, Some(self.local_now(now)))
    }

    pub fn cancel_booking(&self, provider: &ProviderId, id: &BookingId) -> Result<Booking> {
        self.committer(provider)?.cancel(id)
    }

    /// Export providers, bookings and ledger entries.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            providers: self
                .providers
                .values()
                .map(|c| ProviderSnapshot {
                    id: c.provider().clone(),
                    rates: c.catalog().rates().to_vec(),
                    windows: c.availability().windows().to_vec(),
                    bookings: c.revisions(),
                })
                .collect(),
            courses: self.ledger.courses(),
            tokens: self.ledger.tokens(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::availability::fixtures::window;
    use crate::ledger::fixtures::{course, token};
    use crate::ledger::TokenStatus;
    use crate::rate::fixtures::rate;

    pub fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    /// Sunday Mar 1 2026, 08:00 UTC.
    pub fn morning() -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    /// Provider `p1` with a 50-min rate `r50`, a 90-min rate `r90` and a
    /// supervision-only rate `sup`; counterparty `c1` holds an available
    /// token and a course with 2 of 8 sessions used, both for `r50`.
    pub fn engine() -> BookingEngine {
        let mut supervision = rate("sup", 60, 0);
        supervision.is_supervision_only = true;
        let catalog = RateCatalog::new(
            "p1".into(),
            vec![rate("r50", 50, 10), rate("r90", 90, 15), supervision],
        )
        .unwrap();
        let availability = AvailabilityStore::new(
            "p1".into(),
            vec![
                window(date(4), 540, 720, &["r50", "r90", "sup"]),
                window(date(11), 540, 720, &["r50"]),
            ],
            &catalog,
        )
        .unwrap();
        let ledger = CreditLedger::with_entries(
            vec![course("cb1", "r50", 2, 8)],
            vec![token("t1", "r50", TokenStatus::Available)],
        )
        .unwrap();
        let mut engine = BookingEngine::with_ledger(EngineConfig::default(), ledger).unwrap();
        engine
            .register(BookingCommitter::new(catalog, availability).unwrap())
            .unwrap();
        engine
    }
}
