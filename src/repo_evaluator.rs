//! Repo Evaluator (spec §4.6): runs every registered policy against one
//! repository and produces a `{policyName -> pass}` map for the caller
//! (the Reconciliation Engine) to aggregate.
//!
//! The Analysis Context handle is acquired once per repo and released on
//! every exit path — including early `?` returns from a failing
//! policy — by running the body in an inner function and always calling
//! `AnalysisContext::close` on the way out, the `async`-compatible
//! equivalent of a scope guard (stable Rust has no async `Drop`).

use std::collections::HashMap;

use octocrab::Octocrab;

use crate::analysis::AnalysisContext;
use crate::error::{EngineError, Result};
use crate::issue_tracker::IssueTracker;
use crate::policy::registry::PolicyRegistry;
use crate::policyconfig::{ConfigSource, PolicyAction};

pub struct RepoEvalOutcome {
    pub results: HashMap<String, bool>,
}

/// Evaluate every policy in `registry` against `owner/repo` (spec §4.6
/// steps 1–3).
#[allow(clippy::too_many_arguments)]
pub async fn evaluate_repo(
    client: &Octocrab,
    config_source: &dyn ConfigSource,
    analysis: &AnalysisContext,
    registry: &PolicyRegistry,
    issue_tracker: &IssueTracker,
    do_nothing_on_opt_out: bool,
    owner: &str,
    repo: &str,
) -> Result<RepoEvalOutcome> {
    let full_name = format!("{owner}/{repo}");
    let result = evaluate_repo_inner(
        client,
        config_source,
        analysis,
        registry,
        issue_tracker,
        do_nothing_on_opt_out,
        owner,
        repo,
    )
    .await;
    analysis.close(&full_name).await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn evaluate_repo_inner(
    client: &Octocrab,
    config_source: &dyn ConfigSource,
    analysis: &AnalysisContext,
    registry: &PolicyRegistry,
    issue_tracker: &IssueTracker,
    do_nothing_on_opt_out: bool,
    owner: &str,
    repo: &str,
) -> Result<RepoEvalOutcome> {
    let mut results = HashMap::new();

    for policy in registry.all() {
        let name = policy.name();
        // `Policy::is_enabled` is the capability-set entry point (spec
        // §4.5); the merged config is also fetched directly here because
        // the Issue Tracker needs the resolved issue repo/label/footer,
        // which are not part of the `Policy` trait's surface.
        let enabled = policy.is_enabled(analysis, client, owner, repo).await?;
        let merged = config_source
            .fetch(client, owner, repo, policy.config_file())
            .await?;

        if !enabled {
            if do_nothing_on_opt_out {
                // §4.6: when the operator has opted into "do nothing on
                // opt-out", a disabled policy is skipped entirely — no
                // check call, no tracking-issue traffic.
                tracing::debug!(owner, repo, policy = name, "policy disabled, skipping");
                continue;
            }
            tracing::debug!(owner, repo, policy = name, "policy disabled, clearing");
            results.insert(name.to_string(), true);
            continue;
        }

        let policy_result = match policy.check(analysis, client, owner, repo).await {
            Ok(r) => r,
            Err(e) => {
                // §4.6 step 2: a failing check aborts the policy loop for
                // this repo and propagates, rather than being skipped.
                tracing::warn!(owner, repo, policy = name, error = %e, "policy check failed");
                return Err(EngineError::PolicyCheck(e.into()));
            }
        };

        if !policy_result.enabled {
            // The policy itself considers itself inapplicable to this repo
            // (distinct from config-level enablement); record nothing.
            continue;
        }

        results.insert(name.to_string(), policy_result.pass);

        let issue_repo = merged.issue_repo.as_deref().unwrap_or(repo);
        let action = policy.get_action(analysis, client, owner, repo).await?;
        match action {
            PolicyAction::Log => {
                tracing::info!(
                    owner,
                    repo,
                    policy = name,
                    pass = policy_result.pass,
                    "policy evaluated"
                );
            }
            PolicyAction::Issue => {
                if policy_result.pass {
                    issue_tracker
                        .close(client, owner, issue_repo, name, owner, repo, &merged.issue_label)
                        .await?;
                } else {
                    issue_tracker
                        .ensure(
                            client,
                            owner,
                            repo,
                            owner,
                            issue_repo,
                            name,
                            &policy_result.notify_text,
                            &merged.issue_label,
                            merged.issue_footer.as_deref(),
                        )
                        .await?;
                }
            }
            PolicyAction::Fix => {
                if policy_result.pass {
                    issue_tracker
                        .close(client, owner, issue_repo, name, owner, repo, &merged.issue_label)
                        .await?;
                } else {
                    policy.fix(analysis, client, owner, repo).await?;
                }
            }
            PolicyAction::Email => {
                tracing::warn!(owner, repo, policy = name, "email action not implemented");
            }
            PolicyAction::Unknown => {
                tracing::warn!(owner, repo, policy = name, "unknown policy action");
            }
        }
    }

    Ok(RepoEvalOutcome { results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::registry::fixtures::FixturePolicy;
    use crate::policyconfig::{MergedPolicyConfig, OptConfig};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn anon_client() -> Octocrab {
        Octocrab::builder().build().unwrap()
    }

    fn tracker() -> IssueTracker {
        IssueTracker::new(Duration::from_secs(24 * 60 * 60))
    }

    fn ctx() -> AnalysisContext {
        AnalysisContext::new()
    }

    /// A `ConfigSource` that hands back a fixed, pre-merged config with no
    /// network I/O, so evaluator tests don't depend on GitHub being
    /// reachable.
    struct FixedConfig(MergedPolicyConfig);

    #[async_trait]
    impl ConfigSource for FixedConfig {
        async fn fetch(
            &self,
            _client: &Octocrab,
            _owner: &str,
            _repo: &str,
            _policy_file: &str,
        ) -> Result<MergedPolicyConfig> {
            Ok(self.0.clone())
        }
    }

    fn enabled_config() -> FixedConfig {
        FixedConfig(MergedPolicyConfig {
            action: PolicyAction::Log,
            opt_config: OptConfig::default(),
            issue_repo: None,
            issue_label: "allstar".to_string(),
            issue_footer: None,
        })
    }

    #[tokio::test]
    async fn disabled_policy_with_do_nothing_flag_is_skipped_not_recorded() {
        let fixture = FixturePolicy::new("p", PolicyAction::Log);
        fixture.enabled.store(false, Ordering::SeqCst);
        let registry = PolicyRegistry::new(vec![Arc::new(fixture)]);
        let config = enabled_config();
        let client = anon_client();
        let tracker = tracker();

        let outcome = evaluate_repo_inner(
            &client, &config, &ctx(), &registry, &tracker, true, "owner", "repo",
        )
        .await
        .unwrap();
        assert!(outcome.results.get("p").is_none());
    }

    #[tokio::test]
    async fn disabled_policy_without_do_nothing_flag_clears_to_passing() {
        let fixture = FixturePolicy::new("p", PolicyAction::Log);
        fixture.enabled.store(false, Ordering::SeqCst);
        let registry = PolicyRegistry::new(vec![Arc::new(fixture)]);
        let config = enabled_config();
        let client = anon_client();
        let tracker = tracker();

        let outcome = evaluate_repo_inner(
            &client, &config, &ctx(), &registry, &tracker, false, "owner", "repo",
        )
        .await
        .unwrap();
        assert_eq!(outcome.results.get("p"), Some(&true));
    }

    #[tokio::test]
    async fn enabled_passing_policy_with_log_action_is_recorded() {
        let registry = PolicyRegistry::new(vec![Arc::new(FixturePolicy::new(
            "p",
            PolicyAction::Log,
        ))]);
        let config = enabled_config();
        let client = anon_client();
        let tracker = tracker();

        let outcome = evaluate_repo_inner(
            &client, &config, &ctx(), &registry, &tracker, true, "owner", "repo",
        )
        .await
        .unwrap();
        assert_eq!(outcome.results.get("p"), Some(&true));
    }

    #[tokio::test]
    async fn policy_result_disabled_flag_records_nothing() {
        let fixture = FixturePolicy::new("p", PolicyAction::Log);
        fixture.result_enabled.store(false, Ordering::SeqCst);
        let registry = PolicyRegistry::new(vec![Arc::new(fixture)]);
        let config = enabled_config();
        let client = anon_client();
        let tracker = tracker();

        let outcome = evaluate_repo_inner(
            &client, &config, &ctx(), &registry, &tracker, true, "owner", "repo",
        )
        .await
        .unwrap();
        assert!(outcome.results.get("p").is_none());
    }

    #[tokio::test]
    async fn unknown_action_is_logged_not_fatal() {
        let fixture = FixturePolicy::new("p", PolicyAction::Unknown);
        fixture.passing.store(false, Ordering::SeqCst);
        let registry = PolicyRegistry::new(vec![Arc::new(fixture)]);
        let config = enabled_config();
        let client = anon_client();
        let tracker = tracker();

        let outcome = evaluate_repo_inner(
            &client, &config, &ctx(), &registry, &tracker, false, "owner", "repo",
        )
        .await
        .unwrap();
        assert_eq!(outcome.results.get("p"), Some(&false));
    }

    #[tokio::test]
    async fn failing_check_aborts_the_repo_and_propagates() {
        let bad = FixturePolicy::new("bad", PolicyAction::Log);
        bad.check_errors.store(true, Ordering::SeqCst);
        let good = FixturePolicy::new("good", PolicyAction::Log);
        let good_calls = good.check_calls.clone();
        let registry = PolicyRegistry::new(vec![Arc::new(bad), Arc::new(good)]);
        let config = enabled_config();
        let client = anon_client();
        let tracker = tracker();

        let result = evaluate_repo_inner(
            &client, &config, &ctx(), &registry, &tracker, true, "owner", "repo",
        )
        .await;

        assert!(matches!(result, Err(EngineError::PolicyCheck(_))));
        assert_eq!(good_calls.load(Ordering::SeqCst), 0);
    }
}
