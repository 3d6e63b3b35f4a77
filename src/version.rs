// src/version.rs
//! Version strings for the binary and the upstream User-Agent

/// Crate version, set at build time by cargo
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Product name used in output and headers
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Value sent as the `User-Agent` header
pub fn user_agent() -> String {
    format!("{}/{}", NAME, VERSION)
}

/// Human-readable version line for `--version`
pub fn print() -> String {
    format!(
        "{} version {} ({}/{})",
        NAME,
        VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
