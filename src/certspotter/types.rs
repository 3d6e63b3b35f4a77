// src/certspotter/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields the issuances endpoint can expand inline
pub const EXPAND_CERT: &str = "cert";
pub const EXPAND_DNS_NAMES: &str = "dns_names";
pub const EXPAND_ISSUER: &str = "issuer";

/// Single certificate issuance as reported by the certspotter API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issuance {
    pub id: String,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub tbs_sha256: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    #[serde(default)]
    pub pubkey_sha256: Option<String>,
    #[serde(default)]
    pub issuer: Option<Issuer>,
    #[serde(default, rename = "cert")]
    pub certificate: Option<Certificate>,
}

impl Issuance {
    /// Whether `now` lies inside the certificate validity window (inclusive)
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_before && now <= self.not_after
    }

    /// Whether the embedded certificate is a CT precertificate
    pub fn is_precert(&self) -> bool {
        matches!(
            self.certificate.as_ref().map(|c| c.kind),
            Some(CertificateType::Precert)
        )
    }
}

/// Embedded certificate, present when `cert` was expanded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default, rename = "type")]
    pub kind: CertificateType,
}

/// Missing or unrecognised types decode as `Unknown`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    Cert,
    Precert,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Embedded issuer, present when `issuer` was expanded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issuer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pubkey_sha256: Option<String>,
}

/// Query parameters for `GET /issuances`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetIssuancesOptions {
    pub domain: String,
    pub include_subdomains: bool,
    pub match_wildcards: bool,
    /// Pagination cursor, the id of the last issuance already seen
    pub after: Option<String>,
    pub expand: Vec<String>,
}

impl GetIssuancesOptions {
    /// Options used by the discovery pipeline for one configured domain
    pub fn for_domain(domain: impl Into<String>, include_subdomains: bool) -> Self {
        Self {
            domain: domain.into(),
            include_subdomains,
            match_wildcards: false,
            after: None,
            expand: vec![
                EXPAND_CERT.to_string(),
                EXPAND_DNS_NAMES.to_string(),
                EXPAND_ISSUER.to_string(),
            ],
        }
    }

    /// Encode as query pairs; boolean flags and the cursor are omitted when unset
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("domain", self.domain.clone())];
        if self.include_subdomains {
            pairs.push(("include_subdomains", "true".to_string()));
        }
        if self.match_wildcards {
            pairs.push(("match_wildcards", "true".to_string()));
        }
        if let Some(ref after) = self.after {
            pairs.push(("after", after.clone()));
        }
        for field in &self.expand {
            pairs.push(("expand", field.clone()));
        }
        pairs
    }
}
