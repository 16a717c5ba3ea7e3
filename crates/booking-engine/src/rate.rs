//! Session rates and the provider's rate catalog.

use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};
use crate::ids::{ProviderId, RateId};

/// How a session is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Modality {
    Video,
    InPerson,
    Text,
    PhoneCall,
}

/// A published session-rate definition. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRate {
    pub id: RateId,
    pub title: String,
    pub modality: Modality,
    pub duration_minutes: u32,
    /// Price in minor currency units.
    pub price: u64,
    /// Idle buffer after a session. Only spaces long (>= 60 min) sessions.
    #[serde(default)]
    pub cooldown_minutes: u32,
    #[serde(default)]
    pub is_supervision_only: bool,
}

/// The immutable list of rates a provider has published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCatalog {
    provider: ProviderId,
    rates: Vec<SessionRate>,
}

impl RateCatalog {
    /// Build a catalog, rejecting zero-length sessions and duplicate ids.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidRate`] if any rate is malformed.
    pub fn new(provider: ProviderId, rates: Vec<SessionRate>) -> Result<Self> {
        for (i, rate) in rates.iter().enumerate() {
            if rate.duration_minutes == 0 {
                return Err(BookingError::InvalidRate(format!(
                    "'{}': duration must be positive",
                    rate.id
                )));
            }
            if rates[..i].iter().any(|r| r.id == rate.id) {
                return Err(BookingError::InvalidRate(format!(
                    "'{}': duplicate rate id",
                    rate.id
                )));
            }
        }
        Ok(Self { provider, rates })
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn rates(&self) -> &[SessionRate] {
        &self.rates
    }

    pub fn get(&self, id: &RateId) -> Option<&SessionRate> {
        self.rates.iter().find(|r| &r.id == id)
    }

    /// Look up a rate, failing with [`BookingError::UnknownRate`].
    pub fn require(&self, id: &RateId) -> Result<&SessionRate> {
        self.get(id)
            .ok_or_else(|| BookingError::UnknownRate(id.clone()))
    }

    pub fn contains(&self, id: &RateId) -> bool {
        self.get(id).is_some()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::rate;
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        let catalog =
            RateCatalog::new("p1".into(), vec![rate("r50", 50, 10), rate("r90", 90, 15)]).unwrap();
        assert_eq!(catalog.require(&"r90".into()).unwrap().cooldown_minutes, 15);
        assert!(catalog.contains(&"r50".into()));
        assert!(matches!(
            catalog.require(&"nope".into()),
            Err(BookingError::UnknownRate(_))
        ));
    }

    #[test]
    fn test_catalog_rejects_zero_duration() {
        let err = RateCatalog::new("p1".into(), vec![rate("r0", 0, 0)]).unwrap_err();
        assert!(matches!(err, BookingError::InvalidRate(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_catalog_rejects_duplicate_ids() {
        let err =
            RateCatalog::new("p1".into(), vec![rate("r", 50, 0), rate("r", 90, 0)]).unwrap_err();
        assert!(matches!(err, BookingError::InvalidRate(_)));
    }

    #[test]
    fn test_rate_deserializes_with_defaults() {
        let json = r#"{"id":"r1","title":"Intro","modality":"phoneCall","duration_minutes":30,"price":0}"#;
        let rate: SessionRate = serde_json::from_str(json).unwrap();
        assert_eq!(rate.modality, Modality::PhoneCall);
        assert_eq!(rate.cooldown_minutes, 0);
        assert!(!rate.is_supervision_only);
    }
}
