// src/certspotter/mod.rs
pub mod client;
pub mod types;

pub use client::{
    CertspotterClient, ClientConfig, ClientError, IssuanceSource, Page, ResponseMeta,
    DEFAULT_BASE_URL,
};
pub use types::{Certificate, CertificateType, GetIssuancesOptions, Issuance, Issuer};
