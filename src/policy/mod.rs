//! Policy Registry & Policy Capability Set (spec §4.5).
//!
//! The engine knows policies only through the `Policy` trait below; the
//! individual check bodies (branch protection, SECURITY.md presence,
//! outside-collaborator rules, etc.) are out of scope for this crate
//! (spec §1) and are not implemented here. The `async_trait`-over-`dyn`
//! shape is grounded in `agentkernel`'s backend trait, which puts async
//! methods on a trait object the same way. Every method takes the
//! Analysis Context handle as its first argument, matching spec §4.5's
//! `ctx` parameter, so a real policy can reach the shared per-repo
//! checkout through `ctx.get(...)` when it needs repo contents.

pub mod registry;

use async_trait::async_trait;
use octocrab::Octocrab;

use crate::analysis::AnalysisContext;
use crate::error::Result;
use crate::policyconfig::PolicyAction;

/// The three scalar fields the engine consumes from a policy's check
/// (spec §3 `PolicyResult`; `details` is intentionally not modeled here —
/// it is opaque to the engine and belongs to the concrete policy).
#[derive(Debug, Clone)]
pub struct PolicyResult {
    pub enabled: bool,
    pub pass: bool,
    pub notify_text: String,
}

impl PolicyResult {
    pub fn passing() -> Self {
        Self {
            enabled: true,
            pass: true,
            notify_text: String::new(),
        }
    }

    pub fn failing(notify_text: impl Into<String>) -> Self {
        Self {
            enabled: true,
            pass: false,
            notify_text: notify_text.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            pass: true,
            notify_text: String::new(),
        }
    }
}

/// A named check with an enablement rule, a pass/fail predicate, and an
/// action to take on failure (spec Glossary).
#[async_trait]
pub trait Policy: Send + Sync {
    /// Stable, human-readable name; also the key into result maps and
    /// tracking-issue titles.
    fn name(&self) -> &str;

    /// The policy's config file name within the org/org-per-repo/repo
    /// config layers, e.g. `"branch_protection.yaml"`.
    fn config_file(&self) -> &str;

    async fn is_enabled(
        &self,
        ctx: &AnalysisContext,
        client: &Octocrab,
        owner: &str,
        repo: &str,
    ) -> Result<bool>;

    async fn check(
        &self,
        ctx: &AnalysisContext,
        client: &Octocrab,
        owner: &str,
        repo: &str,
    ) -> Result<PolicyResult>;

    async fn get_action(
        &self,
        ctx: &AnalysisContext,
        client: &Octocrab,
        owner: &str,
        repo: &str,
    ) -> Result<PolicyAction>;

    /// Optional; default is a no-op (policies with no automated fix).
    async fn fix(
        &self,
        _ctx: &AnalysisContext,
        _client: &Octocrab,
        _owner: &str,
        _repo: &str,
    ) -> Result<()> {
        Ok(())
    }
}
