// src/export/filter.rs
//! Filter stages applied to a snapshot before targets are built

use chrono::{DateTime, Utc};

use crate::certspotter::Issuance;

/// Drops issuances outside their validity window at `now`
pub fn within_validity(issuance: &Issuance, now: DateTime<Utc>) -> bool {
    issuance.is_valid_at(now)
}

/// Drops CT precertificates; issuances without an embedded certificate pass
pub fn not_precert(issuance: &Issuance) -> bool {
    !issuance.is_precert()
}

/// Which filter stages run before export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPolicy {
    pub exclude_precerts: bool,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            exclude_precerts: true,
        }
    }
}

impl FilterPolicy {
    pub fn accepts(&self, issuance: &Issuance, now: DateTime<Utc>) -> bool {
        if self.exclude_precerts && !not_precert(issuance) {
            return false;
        }
        within_validity(issuance, now)
    }

    /// Keep the issuances accepted at `now`, in input order
    pub fn apply<'a>(&self, issuances: &'a [Issuance], now: DateTime<Utc>) -> Vec<&'a Issuance> {
        issuances
            .iter()
            .filter(|issuance| self.accepts(issuance, now))
            .collect()
    }
}
