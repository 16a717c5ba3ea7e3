//! Slot generation: availability window + session length → bookable starts.
//!
//! [`compute_start_times`] is a pure function. It performs no I/O, reads no
//! clock and knows nothing about existing bookings; collision avoidance and
//! same-day filtering are layered on top by the engine.
//!
//! # Policy
//!
//! - Sessions shorter than an hour are anchored to the top of the hour. The
//!   first start is the window start rounded up to the next full hour and
//!   starts repeat every 60 minutes. Cooldown does not affect spacing.
//! - Sessions of an hour or more pack back-to-back from the window start,
//!   spaced by `duration + cooldown`, with no hour alignment.
//!
//! The jump at exactly 60 minutes is intentional and must be preserved.

use crate::availability::AvailabilityWindow;
use crate::error::{BookingError, Result};
use crate::rate::SessionRate;
use crate::time::{format_minutes, MINUTES_PER_HOUR};

/// Sessions at or above this length pack back-to-back instead of hour-anchoring.
pub const LONG_SESSION_MINUTES: u32 = 60;

/// Compute every valid start time inside `[window_start, window_end)`.
///
/// All values are minute offsets from local midnight. A start is emitted only
/// if the whole session fits: `start + duration_minutes <= window_end`.
///
/// # Errors
///
/// Returns [`BookingError::InvalidWindow`] if `window_start >= window_end` or
/// `duration_minutes == 0`. A window that is merely too short for the session
/// is valid and yields an empty list.
///
/// # Examples
///
/// ```
/// use booking_engine::slots::compute_start_times;
///
/// // 09:05–12:00, 50-minute sessions: hour-anchored, 09:05 is not offered
/// let starts = compute_start_times(545, 720, 50, 10).unwrap();
/// assert_eq!(starts, vec![600, 660]);
///
/// // 09:00–12:00, 90-minute sessions with a 15-minute cooldown
/// let starts = compute_start_times(540, 720, 90, 15).unwrap();
/// assert_eq!(starts, vec![540]);
/// ```
pub fn compute_start_times(
    window_start: u32,
    window_end: u32,
    duration_minutes: u32,
    cooldown_minutes: u32,
) -> Result<Vec<u32>> {
    if window_start >= window_end {
        return Err(BookingError::InvalidWindow(format!(
            "start {} is not before end {}",
            format_minutes(window_start),
            format_minutes(window_end)
        )));
    }
    if duration_minutes == 0 {
        return Err(BookingError::InvalidWindow(
            "session duration must be positive".to_string(),
        ));
    }

    let (first, step) = if duration_minutes < LONG_SESSION_MINUTES {
        let anchored = window_start
            .div_ceil(MINUTES_PER_HOUR)
            .checked_mul(MINUTES_PER_HOUR);
        match anchored {
            Some(first) => (first, MINUTES_PER_HOUR),
            None => return Ok(Vec::new()),
        }
    } else {
        match duration_minutes.checked_add(cooldown_minutes) {
            Some(block) => (window_start, block),
            // A block that overflows can only ever fit once.
            None => (window_start, u32::MAX),
        }
    };

    let mut starts = Vec::new();
    let mut t = first;
    while let Some(end) = t.checked_add(duration_minutes) {
        if end > window_end {
            break;
        }
        starts.push(t);
        match t.checked_add(step) {
            Some(next) => t = next,
            None => break,
        }
    }
    Ok(starts)
}

/// Minutes a session holds from its start. A long session also holds its
/// cooldown, so the next session cannot start inside it.
pub fn held_minutes(duration_minutes: u32, cooldown_minutes: u32) -> u32 {
    if duration_minutes < LONG_SESSION_MINUTES {
        duration_minutes
    } else {
        duration_minutes.saturating_add(cooldown_minutes)
    }
}

/// Start times for `rate` inside `window`, ignoring whether the window enables it.
pub fn window_start_times(window: &AvailabilityWindow, rate: &SessionRate) -> Result<Vec<u32>> {
    compute_start_times(
        window.start_minutes,
        window.end_minutes,
        rate.duration_minutes,
        rate.cooldown_minutes,
    )
}
