// src/cli.rs
use clap::Parser;

/// certspotter-sd: Prometheus service discovery from Certificate Transparency
///
/// Polls the certspotter API for certificates issued to the configured
/// domains and writes them as file_sd target files.
#[derive(Parser, Debug, Clone)]
#[command(name = "certspotter-sd")]
#[command(author, about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    // ===== Input & Configuration =====
    /// Path to TOML config file
    #[arg(short = 'c', long = "config", default_value = "certspotter-sd.toml")]
    pub config: String,

    // ===== Metrics =====
    /// Serve Prometheus metrics on this port (enables metrics)
    #[arg(long = "metrics-port")]
    pub metrics_port: Option<u16>,

    /// Also write Prometheus metrics to this textfile (enables metrics)
    #[arg(long = "metrics-file")]
    pub metrics_file: Option<String>,

    // ===== Logging =====
    /// Verbose logging (set log level to debug)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet logging (set log level to warn)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    // ===== Utility Commands =====
    /// Print version information and exit
    #[arg(short = 'V', long = "version")]
    pub version: bool,
}

impl Cli {
    /// Validate flag combinations and return errors for invalid usage
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.verbose && self.quiet {
            anyhow::bail!("Cannot specify both --verbose and --quiet");
        }

        Ok(())
    }

    /// Whether any metrics flag was given
    pub fn metrics_requested(&self) -> bool {
        self.metrics_port.is_some() || self.metrics_file.is_some()
    }

    /// Log level forced by flags, if any
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("warn")
        } else {
            None
        }
    }
}
