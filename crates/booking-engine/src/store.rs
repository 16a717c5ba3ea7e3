//! Committed booking records.
//!
//! Records are append-only: a status change (cancellation) is stored as a new
//! revision of the same booking id, never an in-place edit. The latest
//! revision is the current state; earlier ones remain as history.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ids::{BookingId, CounterpartyId, ProviderId, RateId};
use crate::ledger::PaymentSource;
use crate::slots::held_minutes;
use crate::time::hhmm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Committed inside the window's occupancy ceiling.
    Confirmed,
    /// Committed past the occupancy ceiling; the provider still has to accept.
    Requested,
    Cancelled,
}

/// One revision of a booking record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub provider_id: ProviderId,
    pub counterparty_id: CounterpartyId,
    pub rate_id: RateId,
    pub date: NaiveDate,
    #[serde(rename = "start", with = "hhmm")]
    pub start_minutes: u32,
    pub duration_minutes: u32,
    /// The rate's cooldown when the booking was made.
    #[serde(default)]
    pub cooldown_minutes: u32,
    pub payment_source: PaymentSource,
    pub status: BookingStatus,
}

impl Booking {
    pub fn end_minutes(&self) -> u32 {
        self.start_minutes.saturating_add(self.duration_minutes)
    }

    /// End of the time this booking holds, cooldown included.
    pub fn held_until(&self) -> u32 {
        self.start_minutes
            .saturating_add(held_minutes(self.duration_minutes, self.cooldown_minutes))
    }

    /// Whether this booking still holds its time.
    pub fn occupies(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    /// Whether `[start, start + held)` intersects the time this booking holds.
    ///
    /// `held` is the candidate's own [`held_minutes`], so a long candidate's
    /// cooldown may not run into this booking either.
    pub fn overlaps(&self, start: u32, held: u32) -> bool {
        start < self.held_until() && self.start_minutes < start.saturating_add(held)
    }

    /// The next revision with a different status.
    pub fn with_status(&self, status: BookingStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Where a committer keeps booking records.
///
/// Implementations hold one provider's records. They are only touched while
/// the owning committer holds its lock, so they need no locking of their own.
pub trait BookingStore: Send {
    /// Append a revision. A revision for an existing id supersedes it.
    fn append(&mut self, booking: Booking);

    /// Latest revision of `id`.
    fn get(&self, id: &BookingId) -> Option<Booking>;

    /// Every revision of `id`, oldest first.
    fn history(&self, id: &BookingId) -> Vec<Booking>;

    /// Latest revision of every booking on `date`, in start order.
    fn on_date(&self, date: NaiveDate) -> Vec<Booking>;

    /// Every revision of every booking, in append order.
    fn revisions(&self) -> Vec<Booking>;
}

/// A [`BookingStore`] held in memory.
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    log: Vec<Booking>,
    latest: BTreeMap<BookingId, usize>,
    by_date: BTreeMap<NaiveDate, Vec<BookingId>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookingStore for InMemoryBookingStore {
    fn append(&mut self, booking: Booking) {
        let id = booking.id;
        if !self.latest.contains_key(&id) {
            self.by_date.entry(booking.date).or_default().push(id);
        }
        self.latest.insert(id, self.log.len());
        self.log.push(booking);
    }

    fn get(&self, id: &BookingId) -> Option<Booking> {
        self.latest.get(id).map(|&i| self.log[i].clone())
    }

    fn history(&self, id: &BookingId) -> Vec<Booking> {
        self.log.iter().filter(|b| &b.id == id).cloned().collect()
    }

    fn on_date(&self, date: NaiveDate) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .by_date
            .get(&date)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(id))
            .collect();
        bookings.sort_by_key(|b| b.start_minutes);
        bookings
    }

    fn revisions(&self) -> Vec<Booking> {
        self.log.clone()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn booking(date: NaiveDate, start: u32, duration: u32) -> Booking {
        Booking {
            id: BookingId::generate(),
            provider_id: "p1".into(),
            counterparty_id: "c1".into(),
            rate_id: "r50".into(),
            date,
            start_minutes: start,
            duration_minutes: duration,
            cooldown_minutes: 0,
            payment_source: PaymentSource::Cash,
            status: BookingStatus::Confirmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::booking;
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_overlap_is_half_open() {
        let b = booking(date(2), 600, 50);
        assert!(b.overlaps(600, 50));
        assert!(b.overlaps(540, 61));
        assert!(b.overlaps(649, 10));
        assert!(!b.overlaps(650, 50));
        assert!(!b.overlaps(540, 60));
    }

    #[test]
    fn test_long_booking_holds_its_cooldown() {
        let mut b = booking(date(2), 540, 90);
        b.cooldown_minutes = 15;
        assert_eq!(b.end_minutes(), 630);
        assert_eq!(b.held_until(), 645);
        assert!(b.overlaps(630, 90));
        assert!(!b.overlaps(645, 90));
        // A candidate whose own cooldown runs into the booking
        assert!(b.overlaps(450, 105));
        assert!(!b.overlaps(450, 90));
    }

    #[test]
    fn test_short_booking_ignores_cooldown() {
        let mut b = booking(date(2), 600, 50);
        b.cooldown_minutes = 10;
        assert_eq!(b.held_until(), 650);
        assert!(!b.overlaps(650, 50));
    }

    #[test]
    fn test_booking_without_cooldown_deserializes() {
        let json = r#"{"id":"6f1c1b6e-93a4-4b8e-9d3b-2a4f0c1d2e3f","provider_id":"p1","counterparty_id":"c1","rate_id":"r90","date":"2026-03-02","start":"09:00","duration_minutes":90,"payment_source":{"kind":"cash"},"status":"confirmed"}"#;
        let b: Booking = serde_json::from_str(json).unwrap();
        assert_eq!(b.cooldown_minutes, 0);
        assert_eq!(b.held_until(), 630);
    }

    #[test]
    fn test_on_date_sorted_latest_revision() {
        let mut store = InMemoryBookingStore::new();
        let late = booking(date(2), 900, 50);
        let early = booking(date(2), 600, 50);
        store.append(late.clone());
        store.append(early.clone());
        store.append(booking(date(3), 600, 50));
        store.append(late.with_status(BookingStatus::Cancelled));

        let day = store.on_date(date(2));
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].id, early.id);
        assert_eq!(day[1].status, BookingStatus::Cancelled);
    }

    #[test]
    fn test_revisions_are_kept() {
        let mut store = InMemoryBookingStore::new();
        let b = booking(date(2), 600, 50);
        store.append(b.clone());
        store.append(b.with_status(BookingStatus::Cancelled));

        let history = store.history(&b.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, BookingStatus::Confirmed);
        assert_eq!(store.get(&b.id).unwrap().status, BookingStatus::Cancelled);
        assert_eq!(store.revisions().len(), 2);
    }

    #[test]
    fn test_booking_serde_uses_hhmm() {
        let b = booking(date(2), 600, 50);
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["start"], "10:00");
        assert_eq!(json["payment_source"]["kind"], "cash");
    }
}
