//! Error taxonomy shared across the engine (spec §7).
//!
//! Glue code (`main.rs`, startup) uses `anyhow::Error` for convenience;
//! component boundaries that need to distinguish error *kinds* — so the
//! engine can decide "skip this repo" vs "skip this installation" vs
//! "fatal at startup" — return `EngineError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Unparseable env or config file. Never fatal except for the
    /// App private key at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rate-limit, 5xx, network error talking to the forge API.
    #[error("transient forge error: {0}")]
    TransientForge(#[source] anyhow::Error),

    /// Installation-level 403 or `suspended_at` set.
    #[error("forbidden or suspended: {0}")]
    Forbidden(String),

    /// A policy's `check` returned an error.
    #[error("policy check failed: {0}")]
    PolicyCheck(#[source] anyhow::Error),

    /// The operator allowlist excludes this installation.
    #[error("installation {0} not in operator allowlist")]
    Disallowed(i64),

    /// Issue Tracker API call failed.
    #[error("tracking issue operation failed: {0}")]
    TrackingIssue(#[source] anyhow::Error),

    /// `--policy <name>` does not match any registered policy.
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
