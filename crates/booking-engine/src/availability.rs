//! The provider's open availability windows.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};
use crate::ids::{ProviderId, RateId};
use crate::rate::RateCatalog;
use crate::time::{format_minutes, hhmm, MINUTES_PER_DAY};

/// A contiguous span of bookable time on one date.
///
/// Several rates may be enabled in the same window. Their slots are computed
/// independently and may overlap; only committed bookings reserve time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub date: NaiveDate,
    #[serde(rename = "start", with = "hhmm")]
    pub start_minutes: u32,
    #[serde(rename = "end", with = "hhmm")]
    pub end_minutes: u32,
    pub enabled_rate_ids: BTreeSet<RateId>,
    /// Booked minutes beyond this ceiling are admitted as requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_occupancy_minutes: Option<u32>,
}

impl AvailabilityWindow {
    pub fn enables(&self, rate: &RateId) -> bool {
        self.enabled_rate_ids.contains(rate)
    }

    /// Whether `minute` lies inside `[start, end)`.
    pub fn contains_minute(&self, minute: u32) -> bool {
        self.start_minutes <= minute && minute < self.end_minutes
    }
}

/// All windows a provider has opened, ordered by date then start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityStore {
    provider: ProviderId,
    windows: Vec<AvailabilityWindow>,
}

impl AvailabilityStore {
    /// Validate and index a provider's windows against its catalog.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidWindow`] if a window is empty, inverted
    /// or runs past midnight, and [`BookingError::UnknownRate`] if it enables
    /// a rate the catalog does not publish.
    pub fn new(
        provider: ProviderId,
        mut windows: Vec<AvailabilityWindow>,
        catalog: &RateCatalog,
    ) -> Result<Self> {
        for w in &windows {
            if w.start_minutes >= w.end_minutes {
                return Err(BookingError::InvalidWindow(format!(
                    "{}: start {} is not before end {}",
                    w.date,
                    format_minutes(w.start_minutes),
                    format_minutes(w.end_minutes)
                )));
            }
            if w.end_minutes > MINUTES_PER_DAY {
                return Err(BookingError::InvalidWindow(format!(
                    "{}: end {} runs past midnight",
                    w.date,
                    format_minutes(w.end_minutes)
                )));
            }
            if let Some(unknown) = w.enabled_rate_ids.iter().find(|id| !catalog.contains(id)) {
                return Err(BookingError::UnknownRate(unknown.clone()));
            }
        }
        windows.sort_by_key(|w| (w.date, w.start_minutes, w.end_minutes));
        Ok(Self { provider, windows })
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn windows(&self) -> &[AvailabilityWindow] {
        &self.windows
    }

    /// Windows enabling `rate` with dates in `from..=to`, in order.
    pub fn windows_for_rate<'a>(
        &'a self,
        rate: &'a RateId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Iterator<Item = &'a AvailabilityWindow> + 'a {
        self.windows
            .iter()
            .filter(move |w| w.date >= from && w.date <= to && w.enables(rate))
    }
}
