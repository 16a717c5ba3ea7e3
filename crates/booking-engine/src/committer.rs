//! Per-provider slot listing and the atomic booking commit.
//!
//! A [`BookingCommitter`] owns one provider's rate catalog, availability and
//! booking store. Every commit and cancellation runs under the committer's
//! lock, which makes the committer the single ordering point for that
//! provider's slots: two commits for the same `(date, start)` are serialized
//! and the second observes the first's booking. Credit debits go through the
//! [`CreditLedger`], which serializes per source under its own write lock.
//!
//! Lock order is always committer, then ledger.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::availability::AvailabilityStore;
use crate::error::{BookingError, Result};
use crate::ids::{BookingId, CounterpartyId, ProviderId, RateId};
use crate::ledger::{CreditLedger, CreditSource, PaymentSource};
use crate::rate::{RateCatalog, SessionRate};
use crate::slots::{held_minutes, window_start_times};
use crate::store::{Booking, BookingStatus, BookingStore, InMemoryBookingStore};
use crate::time::{format_minutes, hhmm, LocalNow};

/// Whether a slot can be booked outright or only requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Admission {
    Instant,
    /// The window's occupancy ceiling is reached; a commit yields a
    /// [`BookingStatus::Requested`] booking.
    RequestOnly,
}

/// One bookable start for a rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub date: NaiveDate,
    #[serde(rename = "start", with = "hhmm")]
    pub start_minutes: u32,
    pub duration_minutes: u32,
    pub admission: Admission,
}

/// Everything needed to turn a selection into a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub provider: ProviderId,
    pub counterparty: CounterpartyId,
    pub rate: RateId,
    pub date: NaiveDate,
    pub start_minutes: u32,
    /// `None` pays cash.
    pub source: Option<CreditSource>,
}

pub struct BookingCommitter<S = InMemoryBookingStore> {
    catalog: RateCatalog,
    availability: AvailabilityStore,
    store: Mutex<S>,
}

impl BookingCommitter<InMemoryBookingStore> {
    /// A committer with an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidRate`] if the catalog and availability
    /// belong to different providers.
    pub fn new(catalog: RateCatalog, availability: AvailabilityStore) -> Result<Self> {
        Self::with_store(catalog, availability, InMemoryBookingStore::new())
    }
}

impl<S: BookingStore> BookingCommitter<S> {
    pub fn with_store(
        catalog: RateCatalog,
        availability: AvailabilityStore,
        store: S,
    ) -> Result<Self> {
        if catalog.provider() != availability.provider() {
            return Err(BookingError::InvalidRate(format!(
                "catalog of '{}' cannot back availability of '{}'",
                catalog.provider(),
                availability.provider()
            )));
        }
        Ok(Self {
            catalog,
            availability,
            store: Mutex::new(store),
        })
    }

    pub fn provider(&self) -> &ProviderId {
        self.catalog.provider()
    }

    pub fn catalog(&self) -> &RateCatalog {
        &self.catalog
    }

    pub fn availability(&self) -> &AvailabilityStore {
        &self.availability
    }

    /// Open slots for `rate` on dates `from..=to`, in date/start order.
    ///
    /// Starts overlapping a live booking are removed. With `now`, starts that
    /// have already passed in the provider's local time are removed too.
    pub fn open_slots(
        &self,
        rate: &RateId,
        from: NaiveDate,
        to: NaiveDate,
        now: Option<LocalNow>,
    ) -> Result<Vec<AvailableSlot>> {
        let rate = self.catalog.require(rate)?;
        let store = self.store.lock();
        self.open_slots_locked(&*store, rate, from, to, now)
    }

    /// Commit a booking: re-verify the slot, debit at most one credit source,
    /// and append the record, all under the committer lock.
    ///
    /// # Errors
    ///
    /// - [`BookingError::UnknownRate`] if the rate is not in the catalog
    /// - [`BookingError::RateNotEnabledInWindow`] if no window enabling the
    ///   rate offers this start on this date
    /// - [`BookingError::SlotPassed`] if, at `now`, the start is already past
    /// - [`BookingError::SlotTaken`] if a live booking overlaps the slot
    /// - [`BookingError::CreditExhausted`], [`BookingError::UnknownCreditSource`]
    ///   or [`BookingError::CreditSourceMismatch`] from the ledger
    ///
    /// On any error nothing has been written or debited.
    pub fn commit(
        &self,
        request: &CommitRequest,
        ledger: &CreditLedger,
        now: Option<LocalNow>,
    ) -> Result<Booking> {
        if &request.provider != self.provider() {
            return Err(BookingError::UnknownProvider(request.provider.clone()));
        }
        let rate = self.catalog.require(&request.rate)?;

        let mut store = self.store.lock();

        let candidates = self.open_slots_locked(&*store, rate, request.date, request.date, now)?;
        let slot = match candidates
            .into_iter()
            .find(|s| s.start_minutes == request.start_minutes)
        {
            Some(slot) => slot,
            None => return Err(self.reject(&*store, rate, request, now)?),
        };

        let payment_source = match &request.source {
            Some(source) => {
                let handle =
                    ledger.reserve(source, &request.counterparty, &request.provider, &rate.id)?;
                ledger.commit(handle)?
            }
            None => PaymentSource::Cash,
        };

        let booking = Booking {
            id: BookingId::generate(),
            provider_id: request.provider.clone(),
            counterparty_id: request.counterparty.clone(),
            rate_id: rate.id.clone(),
            date: request.date,
            start_minutes: request.start_minutes,
            duration_minutes: rate.duration_minutes,
            cooldown_minutes: rate.cooldown_minutes,
            payment_source,
            status: match slot.admission {
                Admission::Instant => BookingStatus::Confirmed,
                Admission::RequestOnly => BookingStatus::Requested,
            },
        };
        store.append(booking.clone());

        tracing::info!(
            booking = %booking.id,
            provider = %booking.provider_id,
            counterparty = %booking.counterparty_id,
            rate = %booking.rate_id,
            date = %booking.date,
            start = %format_minutes(booking.start_minutes),
            status = ?booking.status,
            "Booking committed"
        );
        Ok(booking)
    }

    /// Cancel a booking by appending a `Cancelled` revision. Its time is freed;
    /// any credit spent on it stays spent.
    pub fn cancel(&self, id: &BookingId) -> Result<Booking> {
        let mut store = self.store.lock();
        let current = store.get(id).ok_or(BookingError::BookingNotFound(*id))?;
        if current.status == BookingStatus::Cancelled {
            return Err(BookingError::InvalidTransition(format!(
                "booking {id} is already cancelled"
            )));
        }
        let cancelled = current.with_status(BookingStatus::Cancelled);
        store.append(cancelled.clone());
        tracing::info!(booking = %id, provider = %cancelled.provider_id, "Booking cancelled");
        Ok(cancelled)
    }

    pub fn booking(&self, id: &BookingId) -> Option<Booking> {
        self.store.lock().get(id)
    }

    pub fn history(&self, id: &BookingId) -> Vec<Booking> {
        self.store.lock().history(id)
    }

    /// Every revision recorded, in append order.
    pub fn revisions(&self) -> Vec<Booking> {
        self.store.lock().revisions()
    }

    /// Seed a revision recorded elsewhere (e.g. loaded from a snapshot).
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidConfig`] if the revision is live and
    /// overlaps another live booking.
    pub fn restore(&self, booking: Booking) -> Result<()> {
        let mut store = self.store.lock();
        if booking.occupies() {
            let held = held_minutes(booking.duration_minutes, booking.cooldown_minutes);
            if let Some(clash) = store.on_date(booking.date).into_iter().find(|b| {
                b.id != booking.id && b.occupies() && b.overlaps(booking.start_minutes, held)
            }) {
                return Err(BookingError::InvalidConfig(format!(
                    "booking {} at {} {} overlaps booking {}",
                    booking.id,
                    booking.date,
                    format_minutes(booking.start_minutes),
                    clash.id
                )));
            }
        }
        store.append(booking);
        Ok(())
    }

    fn open_slots_locked(
        &self,
        store: &S,
        rate: &SessionRate,
        from: NaiveDate,
        to: NaiveDate,
        now: Option<LocalNow>,
    ) -> Result<Vec<AvailableSlot>> {
        let held = held_minutes(rate.duration_minutes, rate.cooldown_minutes);
        let mut slots: BTreeMap<(NaiveDate, u32), Admission> = BTreeMap::new();
        let mut day: Option<(NaiveDate, Vec<Booking>)> = None;

        for window in self.availability.windows_for_rate(&rate.id, from, to) {
            if now.is_some_and(|n| window.date < n.date) {
                continue;
            }
            if day.as_ref().map(|(d, _)| *d) != Some(window.date) {
                let live = store
                    .on_date(window.date)
                    .into_iter()
                    .filter(Booking::occupies)
                    .collect();
                day = Some((window.date, live));
            }
            let booked: &[Booking] = day.as_ref().map(|(_, b)| b.as_slice()).unwrap_or(&[]);

            let occupied: u32 = booked
                .iter()
                .filter(|b| window.contains_minute(b.start_minutes))
                .map(|b| b.duration_minutes)
                .sum();
            let admission = match window.max_occupancy_minutes {
                Some(max) if occupied.saturating_add(rate.duration_minutes) > max => {
                    Admission::RequestOnly
                }
                _ => Admission::Instant,
            };

            for start in window_start_times(window, rate)? {
                if now.is_some_and(|n| n.has_passed(window.date, start)) {
                    continue;
                }
                if booked.iter().any(|b| b.overlaps(start, held)) {
                    continue;
                }
                // Overlapping windows may offer the same start; instant wins.
                slots
                    .entry((window.date, start))
                    .and_modify(|a| {
                        if admission == Admission::Instant {
                            *a = Admission::Instant;
                        }
                    })
                    .or_insert(admission);
            }
        }

        tracing::debug!(
            provider = %self.provider(),
            rate = %rate.id,
            %from,
            %to,
            count = slots.len(),
            "Computed open slots"
        );

        Ok(slots
            .into_iter()
            .map(|((date, start_minutes), admission)| AvailableSlot {
                date,
                start_minutes,
                duration_minutes: rate.duration_minutes,
                admission,
            })
            .collect())
    }

    /// Explain why `request` is not among the open slots.
    fn reject(
        &self,
        store: &S,
        rate: &SessionRate,
        request: &CommitRequest,
        now: Option<LocalNow>,
    ) -> Result<BookingError> {
        let start = format_minutes(request.start_minutes);
        let offered = self
            .availability
            .windows_for_rate(&rate.id, request.date, request.date)
            .map(|w| window_start_times(w, rate))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .any(|t| t == request.start_minutes);

        if !offered {
            return Ok(BookingError::RateNotEnabledInWindow {
                rate: rate.id.clone(),
                date: request.date,
                start,
            });
        }

        if now.is_some_and(|n| n.has_passed(request.date, request.start_minutes)) {
            return Ok(BookingError::SlotPassed {
                date: request.date,
                start,
            });
        }

        let held = held_minutes(rate.duration_minutes, rate.cooldown_minutes);
        let holder = store
            .on_date(request.date)
            .into_iter()
            .find(|b| b.occupies() && b.overlaps(request.start_minutes, held));
        tracing::warn!(
            provider = %request.provider,
            counterparty = %request.counterparty,
            date = %request.date,
            %start,
            held_by = ?holder.map(|b| b.id),
            "Slot already taken"
        );
        Ok(BookingError::SlotTaken {
            provider: request.provider.clone(),
            date: request.date,
            start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::fixtures::window;
    use crate::ledger::fixtures::{course, token};
    use crate::ledger::{CourseStatus, TokenStatus};
    use crate::rate::fixtures::rate;
    use chrono::Datelike;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn committer() -> BookingCommitter {
        let catalog = RateCatalog::new(
            "p1".into(),
            vec![rate("r50", 50, 10), rate("r90", 90, 15)],
        )
        .unwrap();
        let availability = AvailabilityStore::new(
            "p1".into(),
            vec![
                window(date(2), 540, 720, &["r50", "r90"]),
                window(date(3), 545, 720, &["r50"]),
            ],
            &catalog,
        )
        .unwrap();
        BookingCommitter::new(catalog, availability).unwrap()
    }

    fn request(rate: &str, d: u32, start: u32, source: Option<CreditSource>) -> CommitRequest {
        CommitRequest {
            provider: "p1".into(),
            counterparty: "c1".into(),
            rate: rate.into(),
            date: date(d),
            start_minutes: start,
            source,
        }
    }

    fn starts(slots: &[AvailableSlot]) -> Vec<(u32, u32)> {
        slots.iter().map(|s| (s.date.day(), s.start_minutes)).collect()
    }

    #[test]
    fn test_open_slots_across_windows() {
        let c = committer();
        let slots = c.open_slots(&"r50".into(), date(1), date(31), None).unwrap();
        assert_eq!(
            starts(&slots),
            vec![(2, 540), (2, 600), (2, 660), (3, 600), (3, 660)]
        );
        assert!(slots.iter().all(|s| s.admission == Admission::Instant));
    }

    #[test]
    fn test_open_slots_skip_past_times_today() {
        let c = committer();
        let now = LocalNow {
            date: date(2),
            minute: 600,
        };
        let slots = c
            .open_slots(&"r50".into(), date(1), date(31), Some(now))
            .unwrap();
        // 09:00 and 10:00 (at-or-before now) are suppressed
        assert_eq!(starts(&slots), vec![(2, 660), (3, 600), (3, 660)]);
    }

    #[test]
    fn test_commit_cash_then_slot_is_taken() {
        let c = committer();
        let ledger = CreditLedger::new();
        let booking = c.commit(&request("r50", 2, 600, None), &ledger, None).unwrap();
        assert_eq!(booking.payment_source, PaymentSource::Cash);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.duration_minutes, 50);

        let err = c.commit(&request("r50", 2, 600, None), &ledger, None).unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_long_booking_blocks_overlapping_short_slots() {
        let c = committer();
        let ledger = CreditLedger::new();
        c.commit(&request("r90", 2, 540, None), &ledger, None).unwrap();

        // 09:00–10:30 is held: 09:00 and 10:00 are gone for the 50-min rate
        let slots = c.open_slots(&"r50".into(), date(2), date(2), None).unwrap();
        assert_eq!(starts(&slots), vec![(2, 660)]);

        let err = c.commit(&request("r50", 2, 600, None), &ledger, None).unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken { .. }));
    }

    #[test]
    fn test_commit_rejects_start_not_offered() {
        let c = committer();
        let ledger = CreditLedger::new();
        // 09:05 is inside the window but not hour-anchored
        let err = c.commit(&request("r50", 3, 545, None), &ledger, None).unwrap_err();
        assert!(matches!(err, BookingError::RateNotEnabledInWindow { .. }));
        // r90 is not enabled on the 3rd at all
        let err = c.commit(&request("r90", 3, 545, None), &ledger, None).unwrap_err();
        assert!(matches!(err, BookingError::RateNotEnabledInWindow { .. }));
    }

    #[test]
    fn test_commit_debits_exactly_one_source() {
        let c = committer();
        let ledger = CreditLedger::with_entries(
            vec![course("cb1", "r50", 2, 8)],
            vec![token("t1", "r50", TokenStatus::Available)],
        )
        .unwrap();

        let booking = c
            .commit(
                &request("r50", 2, 540, Some(CreditSource::Token("t1".into()))),
                &ledger,
                None,
            )
            .unwrap();
        assert_eq!(booking.payment_source, PaymentSource::Token("t1".into()));
        assert_eq!(ledger.token(&"t1".into()).unwrap().status, TokenStatus::Used);
        assert_eq!(ledger.course(&"cb1".into()).unwrap().sessions_used, 2);
    }

    #[test]
    fn test_exhausted_credit_leaves_slot_free() {
        let c = committer();
        let ledger = CreditLedger::with_entries(vec![course("cb1", "r50", 8, 8)], vec![]).unwrap();
        assert_eq!(ledger.course(&"cb1".into()).unwrap().status, CourseStatus::Completed);

        let err = c
            .commit(
                &request("r50", 2, 540, Some(CreditSource::Course("cb1".into()))),
                &ledger,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::CreditExhausted(_)));
        assert!(c.revisions().is_empty());

        // Falling back to cash succeeds on the same slot
        c.commit(&request("r50", 2, 540, None), &ledger, None).unwrap();
    }

    #[test]
    fn test_occupancy_ceiling_turns_slots_into_requests() {
        let catalog = RateCatalog::new("p1".into(), vec![rate("r50", 50, 0)]).unwrap();
        let mut w = window(date(2), 540, 720, &["r50"]);
        w.max_occupancy_minutes = Some(100);
        let availability = AvailabilityStore::new("p1".into(), vec![w], &catalog).unwrap();
        let c = BookingCommitter::new(catalog, availability).unwrap();
        let ledger = CreditLedger::new();

        let first = c.commit(&request("r50", 2, 540, None), &ledger, None).unwrap();
        assert_eq!(first.status, BookingStatus::Confirmed);
        let second = c.commit(&request("r50", 2, 600, None), &ledger, None).unwrap();
        assert_eq!(second.status, BookingStatus::Confirmed);

        let slots = c.open_slots(&"r50".into(), date(2), date(2), None).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].admission, Admission::RequestOnly);

        let third = c.commit(&request("r50", 2, 660, None), &ledger, None).unwrap();
        assert_eq!(third.status, BookingStatus::Requested);
    }

    #[test]
    fn test_cancel_frees_slot_and_keeps_history() {
        let c = committer();
        let ledger = CreditLedger::new();
        let booking = c.commit(&request("r50", 2, 600, None), &ledger, None).unwrap();

        let cancelled = c.cancel(&booking.id).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(c.history(&booking.id).len(), 2);
        assert!(matches!(
            c.cancel(&booking.id),
            Err(BookingError::InvalidTransition(_))
        ));

        c.commit(&request("r50", 2, 600, None), &ledger, None).unwrap();
    }

    #[test]
    fn test_cancel_unknown_booking() {
        let c = committer();
        let id = BookingId::generate();
        assert_eq!(c.cancel(&id).unwrap_err(), BookingError::BookingNotFound(id));
    }

    #[test]
    fn test_commit_for_other_provider_rejected() {
        let c = committer();
        let mut req = request("r50", 2, 600, None);
        req.provider = "p2".into();
        assert!(matches!(
            c.commit(&req, &CreditLedger::new(), None),
            Err(BookingError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_mismatched_provider_parts_rejected() {
        let catalog = RateCatalog::new("p1".into(), vec![rate("r50", 50, 0)]).unwrap();
        let availability = AvailabilityStore::new("p2".into(), vec![], &catalog).unwrap();
        assert!(BookingCommitter::new(catalog, availability).is_err());
    }

    #[test]
    fn test_commit_rejects_started_slot() {
        let c = committer();
        let ledger = CreditLedger::new();
        let now = LocalNow {
            date: date(2),
            minute: 600,
        };
        // 10:00 starts at the current minute, 09:00 is over
        for start in [540, 600] {
            let err = c
                .commit(&request("r50", 2, start, None), &ledger, Some(now))
                .unwrap_err();
            assert!(matches!(err, BookingError::SlotPassed { .. }));
            assert!(err.is_recoverable());
        }
        let later = LocalNow {
            date: date(5),
            minute: 0,
        };
        assert!(matches!(
            c.commit(&request("r50", 3, 660, None), &ledger, Some(later)),
            Err(BookingError::SlotPassed { .. })
        ));
        assert!(c.revisions().is_empty());

        let booking = c
            .commit(&request("r50", 2, 660, None), &ledger, Some(now))
            .unwrap();
        assert_eq!(booking.start_minutes, 660);
    }

    fn cooldown_committer() -> BookingCommitter {
        let catalog = RateCatalog::new(
            "p1".into(),
            vec![rate("r90", 90, 15), rate("r90b", 90, 0)],
        )
        .unwrap();
        let availability = AvailabilityStore::new(
            "p1".into(),
            vec![window(date(2), 540, 720, &["r90", "r90b"])],
            &catalog,
        )
        .unwrap();
        BookingCommitter::new(catalog, availability).unwrap()
    }

    #[test]
    fn test_booked_cooldown_blocks_next_start() {
        let c = cooldown_committer();
        let ledger = CreditLedger::new();
        let booking = c.commit(&request("r90", 2, 540, None), &ledger, None).unwrap();
        assert_eq!(booking.cooldown_minutes, 15);

        // 09:00–10:30 plus 15 min cooldown: 10:30 for the other rate is held
        let slots = c.open_slots(&"r90b".into(), date(2), date(2), None).unwrap();
        assert!(slots.is_empty());
        assert!(matches!(
            c.commit(&request("r90b", 2, 630, None), &ledger, None),
            Err(BookingError::SlotTaken { .. })
        ));
    }

    #[test]
    fn test_candidate_cooldown_cannot_run_into_booking() {
        let c = cooldown_committer();
        let ledger = CreditLedger::new();
        c.commit(&request("r90b", 2, 630, None), &ledger, None).unwrap();

        // 09:00 + 90 + 15 reaches past 10:30
        let slots = c.open_slots(&"r90".into(), date(2), date(2), None).unwrap();
        assert!(slots.is_empty());
        // Without a cooldown 09:00 still fits
        let slots = c.open_slots(&"r90b".into(), date(2), date(2), None).unwrap();
        assert_eq!(starts(&slots), vec![(2, 540)]);
    }

    #[test]
    fn test_restore_rejects_overlapping_live_bookings() {
        let c = committer();
        let ledger = CreditLedger::new();
        let first = c.commit(&request("r50", 2, 600, None), &ledger, None).unwrap();

        let mut twin = first.clone();
        twin.id = BookingId::generate();
        assert!(matches!(
            c.restore(twin.clone()),
            Err(BookingError::InvalidConfig(_))
        ));

        // Once the first is cancelled the same time can be restored
        c.cancel(&first.id).unwrap();
        c.restore(twin).unwrap();
        assert_eq!(c.revisions().len(), 3);
    }
}
