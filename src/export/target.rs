// src/export/target.rs
use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::certspotter::Issuance;

/// Namespace of every label derived from an issuance
pub const LABEL_PREFIX: &str = "__meta_certspotter_";

/// Namespace of static labels attached per output file
pub const CUSTOM_LABEL_PREFIX: &str = "__meta_certspotter_labels_";

pub const LABEL_ID: &str = "__meta_certspotter_id";
pub const LABEL_CERT_SHA256: &str = "__meta_certspotter_cert_sha256";
pub const LABEL_DNS_NAMES: &str = "__meta_certspotter_dns_names";
pub const LABEL_ISSUER_NAME: &str = "__meta_certspotter_issuer_name";

/// Prometheus file service discovery target group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub labels: BTreeMap<String, String>,
    pub targets: Vec<String>,
}

impl Target {
    /// Build a target from an issuance.
    ///
    /// The id label is always set; the other labels only when the issuance
    /// carries the field. Wildcard names are kept in the label but never
    /// become addresses.
    pub fn from_issuance(issuance: &Issuance) -> Self {
        let mut labels = BTreeMap::new();

        labels.insert(LABEL_ID.to_string(), issuance.id.clone());
        if let Some(ref cert) = issuance.certificate {
            labels.insert(LABEL_CERT_SHA256.to_string(), cert.sha256.clone());
        }
        if !issuance.dns_names.is_empty() {
            labels.insert(LABEL_DNS_NAMES.to_string(), issuance.dns_names.join(";"));
        }
        if let Some(ref issuer) = issuance.issuer {
            labels.insert(LABEL_ISSUER_NAME.to_string(), issuer.name.clone());
        }

        let targets = issuance
            .dns_names
            .iter()
            .filter(|name| !name.starts_with("*."))
            .cloned()
            .collect();

        Self { labels, targets }
    }

    /// Attach static labels under the custom label namespace, overwriting existing values
    pub fn add_labels(&mut self, labels: &BTreeMap<String, String>) {
        for (name, value) in labels {
            self.labels
                .insert(format!("{}{}", CUSTOM_LABEL_PREFIX, name), value.clone());
        }
    }

    /// Check every pattern against the namespaced label of the same name.
    ///
    /// A missing label fails the match; an empty rule set matches everything.
    /// Patterns are expected to be anchored already.
    pub fn matches(&self, rules: &BTreeMap<String, Regex>) -> bool {
        rules.iter().all(|(name, re)| {
            self.labels
                .get(&format!("{}{}", LABEL_PREFIX, name))
                .is_some_and(|value| re.is_match(value))
        })
    }
}

impl From<&Issuance> for Target {
    fn from(issuance: &Issuance) -> Self {
        Self::from_issuance(issuance)
    }
}
