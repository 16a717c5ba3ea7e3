//! The booking wizard: rate → slot → confirmation, as an explicit state machine.
//!
//! Nothing is reserved or debited before [`WizardCommand::Confirm`] succeeds,
//! so going back, switching rates or cancelling never needs cleanup. Every
//! command is accepted or rejected by one total transition function
//! ([`BookingWizard::apply`]); a rejected command leaves the state untouched.
//!
//! The standard and supervision flows are the same machine with a different
//! [`RateFilter`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::committer::{AvailableSlot, CommitRequest};
use crate::engine::BookingEngine;
use crate::error::{BookingError, Result};
use crate::ids::{CounterpartyId, ProviderId, RateId};
use crate::ledger::{CreditSource, CreditSources};
use crate::rate::SessionRate;
use crate::store::{Booking, BookingStore};
use crate::time::{format_minutes, week_start_of};

// ── Rate filter ─────────────────────────────────────────────────────────────

/// Which of a provider's rates a wizard offers.
#[derive(Clone)]
pub struct RateFilter {
    name: &'static str,
    predicate: Arc<dyn Fn(&SessionRate) -> bool + Send + Sync>,
}

impl RateFilter {
    pub fn new(
        name: &'static str,
        predicate: impl Fn(&SessionRate) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            predicate: Arc::new(predicate),
        }
    }

    pub fn all() -> Self {
        Self::new("all", |_| true)
    }

    /// Regular client sessions.
    pub fn standard() -> Self {
        Self::new("standard", |r| !r.is_supervision_only)
    }

    pub fn supervision_only() -> Self {
        Self::new("supervision", |r| r.is_supervision_only)
    }

    pub fn accepts(&self, rate: &SessionRate) -> bool {
        (self.predicate)(rate)
    }
}

impl Default for RateFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for RateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RateFilter").field(&self.name).finish()
    }
}

// ── States ──────────────────────────────────────────────────────────────────

/// A rate offered by the wizard with the credit that could pay for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateChoice {
    pub rate: SessionRate,
    pub credits: CreditSources,
}

/// A chosen rate with its open slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSelection {
    pub rate: SessionRate,
    pub slots: Vec<AvailableSlot>,
    pub credits: CreditSources,
    /// First day of the first week holding an open slot, if any.
    pub calendar_week: Option<NaiveDate>,
}

impl SlotSelection {
    pub fn find(&self, date: NaiveDate, start_minutes: u32) -> Option<&AvailableSlot> {
        self.slots
            .iter()
            .find(|s| s.date == date && s.start_minutes == start_minutes)
    }
}

/// A fully specified booking awaiting the final confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub selection: SlotSelection,
    pub slot: AvailableSlot,
    /// `None` pays cash.
    pub payment: Option<CreditSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardState {
    SelectingRate,
    SelectingSlot(SlotSelection),
    Confirming(Confirmation),
    Committed(Booking),
    Cancelled,
}

impl WizardState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WizardState::Committed(_) | WizardState::Cancelled)
    }

    fn name(&self) -> &'static str {
        match self {
            WizardState::SelectingRate => "SelectingRate",
            WizardState::SelectingSlot(_) => "SelectingSlot",
            WizardState::Confirming(_) => "Confirming",
            WizardState::Committed(_) => "Committed",
            WizardState::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardCommand {
    /// Pick (or clear) a rate. From slot or confirmation steps this starts
    /// over from rate selection.
    SelectRate(Option<RateId>),
    SelectSlot(Option<(NaiveDate, u32)>),
    /// Pick a listed credit source, or `None` for cash.
    ChoosePayment(Option<CreditSource>),
    Back,
    Confirm,
    Cancel,
}

// ── Wizard ──────────────────────────────────────────────────────────────────

/// One counterparty's in-progress booking attempt with one provider.
#[derive(Debug, Clone)]
pub struct BookingWizard {
    provider: ProviderId,
    counterparty: CounterpartyId,
    from: NaiveDate,
    to: NaiveDate,
    filter: RateFilter,
    state: WizardState,
}

impl BookingWizard {
    /// A wizard offering slots dated `from..=to`.
    pub fn new(
        provider: ProviderId,
        counterparty: CounterpartyId,
        from: NaiveDate,
        to: NaiveDate,
        filter: RateFilter,
    ) -> Self {
        Self {
            provider,
            counterparty,
            from,
            to,
            filter,
            state: WizardState::SelectingRate,
        }
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    /// Rates this wizard offers, each annotated with eligible credit.
    pub fn rate_choices<S: BookingStore>(
        &self,
        engine: &BookingEngine<S>,
    ) -> Result<Vec<RateChoice>> {
        Ok(engine
            .catalog(&self.provider)?
            .rates()
            .iter()
            .filter(|r| self.filter.accepts(r))
            .map(|rate| RateChoice {
                rate: rate.clone(),
                credits: engine.list_credit_sources(&self.counterparty, &self.provider, &rate.id),
            })
            .collect())
    }

    /// Apply one command.
    ///
    /// On error the state is unchanged and the error says what the
    /// counterparty has to fix. A failed [`WizardCommand::Confirm`] stays in
    /// `Confirming` so the counterparty can pick another payment or go back.
    pub fn apply<S: BookingStore>(
        &mut self,
        engine: &BookingEngine<S>,
        now: DateTime<Utc>,
        command: WizardCommand,
    ) -> Result<&WizardState> {
        let next = self.transition(engine, now, command.clone());
        match next {
            Ok(state) => {
                tracing::debug!(
                    provider = %self.provider,
                    counterparty = %self.counterparty,
                    from = self.state.name(),
                    to = state.name(),
                    "Wizard transition"
                );
                self.state = state;
                Ok(&self.state)
            }
            Err(e) => {
                tracing::debug!(
                    state = self.state.name(),
                    command = ?command,
                    error = %e,
                    "Wizard command rejected"
                );
                Err(e)
            }
        }
    }

    fn transition<S: BookingStore>(
        &self,
        engine: &BookingEngine<S>,
        now: DateTime<Utc>,
        command: WizardCommand,
    ) -> Result<WizardState> {
        use WizardCommand as C;
        use WizardState as W;

        match (&self.state, command) {
            (W::Committed(_) | W::Cancelled, command) => Err(BookingError::InvalidTransition(
                format!("{:?} after the wizard finished ({})", command, self.state.name()),
            )),

            (_, C::Cancel) => Ok(W::Cancelled),

            (_, C::SelectRate(None)) => match self.state {
                W::SelectingRate => Err(BookingError::NoRateSelected),
                _ => Ok(W::SelectingRate),
            },
            (_, C::SelectRate(Some(rate))) => self.enter_slot_selection(engine, now, &rate),

            (W::SelectingRate, C::SelectSlot(_) | C::Confirm) => Err(BookingError::NoRateSelected),
            (W::SelectingRate, C::Back) => Err(BookingError::InvalidTransition(
                "already at the first step".to_string(),
            )),

            (W::SelectingSlot(_), C::SelectSlot(None) | C::Confirm) => {
                Err(BookingError::NoSlotSelected)
            }
            (W::SelectingSlot(selection), C::SelectSlot(Some((date, start)))) => {
                Self::confirm_slot(selection.clone(), date, start)
            }
            (W::SelectingSlot(_), C::Back) => Ok(W::SelectingRate),

            (W::Confirming(c), C::SelectSlot(None)) => Ok(W::SelectingSlot(c.selection.clone())),
            (W::Confirming(c), C::SelectSlot(Some((date, start)))) => {
                Self::confirm_slot(c.selection.clone(), date, start)
            }
            (W::Confirming(c), C::ChoosePayment(payment)) => {
                if let Some(source) = &payment {
                    if !c.selection.credits.contains(source) {
                        return Err(BookingError::CreditSourceMismatch(format!(
                            "{} is not offered for rate '{}'",
                            source, c.selection.rate.id
                        )));
                    }
                }
                Ok(W::Confirming(Confirmation {
                    payment,
                    ..c.clone()
                }))
            }
            (W::Confirming(c), C::Back) => {
                self.enter_slot_selection(engine, now, &c.selection.rate.id)
            }
            (W::Confirming(c), C::Confirm) => {
                let request = CommitRequest {
                    provider: self.provider.clone(),
                    counterparty: self.counterparty.clone(),
                    rate: c.selection.rate.id.clone(),
                    date: c.slot.date,
                    start_minutes: c.slot.start_minutes,
                    source: c.payment.clone(),
                };
                engine.commit_booking(&request, now).map(W::Committed)
            }

            (state, C::ChoosePayment(_)) => Err(BookingError::InvalidTransition(format!(
                "payment is chosen after a slot, not in {}",
                state.name()
            ))),
        }
    }

    fn enter_slot_selection<S: BookingStore>(
        &self,
        engine: &BookingEngine<S>,
        now: DateTime<Utc>,
        rate: &RateId,
    ) -> Result<WizardState> {
        let rate = engine.catalog(&self.provider)?.require(rate)?.clone();
        if !self.filter.accepts(&rate) {
            return Err(BookingError::InvalidTransition(format!(
                "rate '{}' is not offered by the {} flow",
                rate.id, self.filter.name
            )));
        }

        let slots =
            engine.list_available_slots(&self.provider, &rate.id, self.from, self.to, now)?;
        let credits = engine.list_credit_sources(&self.counterparty, &self.provider, &rate.id);
        let calendar_week = slots
            .first()
            .map(|s| week_start_of(s.date, engine.config().week_start));

        Ok(WizardState::SelectingSlot(SlotSelection {
            rate,
            slots,
            credits,
            calendar_week,
        }))
    }

    fn confirm_slot(selection: SlotSelection, date: NaiveDate, start: u32) -> Result<WizardState> {
        let slot = selection.find(date, start).cloned().ok_or_else(|| {
            BookingError::InvalidTransition(format!(
                "{} {} is not an offered slot for rate '{}'",
                date,
                format_minutes(start),
                selection.rate.id
            ))
        })?;
        Ok(WizardState::Confirming(Confirmation {
            selection,
            slot,
            payment: None,
        }))
    }
}
