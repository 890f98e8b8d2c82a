//! Reconciliation Engine (spec §4.8, §5): the top-level loop. Enumerates
//! installations, applies the operator allowlist, fans out bounded work
//! across installations, and paces passes.
//!
//! The semaphore-gated `JoinSet` fan-out generalizes the teacher's job
//! loop shape (`github/jobs.rs`) from a single worker queue into a
//! bounded-concurrency group keyed by installation, per spec §5.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use octocrab::Octocrab;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::analysis::AnalysisContext;
use crate::config::OperatorConfig;
use crate::error::Result;
use crate::github::GhClientPool;
use crate::issue_tracker::IssueTracker;
use crate::policy::registry::PolicyRegistry;
use crate::policyconfig::ConfigFetcher;
use crate::repo_evaluator;

/// How long a continuous-mode run sleeps between passes. Not exposed as an
/// environment variable — the spec names no such knob, only a "configured
/// period" — so this crate carries one fixed, conservative default.
const PASS_INTERVAL: Duration = Duration::from_secs(6 * 3600);

struct InstallationInfo {
    id: i64,
    account_login: String,
    suspended: bool,
}

struct RepoInfo {
    owner: String,
    name: String,
    archived: bool,
}

pub struct ReconciliationEngine {
    clients: Arc<GhClientPool>,
    config_fetcher: Arc<ConfigFetcher>,
    analysis: Arc<AnalysisContext>,
    registry: PolicyRegistry,
    issue_tracker: Arc<IssueTracker>,
    operator: OperatorConfig,
    repo_filter: Option<(String, String)>,
    token: CancellationToken,
}

impl ReconciliationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clients: Arc<GhClientPool>,
        config_fetcher: Arc<ConfigFetcher>,
        analysis: Arc<AnalysisContext>,
        registry: PolicyRegistry,
        issue_tracker: Arc<IssueTracker>,
        operator: OperatorConfig,
        repo_filter: Option<(String, String)>,
        token: CancellationToken,
    ) -> Self {
        Self {
            clients,
            config_fetcher,
            analysis,
            registry,
            issue_tracker,
            operator,
            repo_filter,
            token,
        }
    }

    /// Run until cancelled (continuous mode) or once (`once = true`).
    pub async fn run(&self, once: bool) {
        loop {
            if self.token.is_cancelled() {
                return;
            }
            self.run_pass().await;
            if once {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(PASS_INTERVAL) => {}
                _ = self.token.cancelled() => return,
            }
        }
    }

    async fn run_pass(&self) {
        let app_client = match self.clients.get(0).await {
            Ok(entry) => entry.client.clone(),
            Err(e) => {
                tracing::error!(error = %e, "failed to build App-level client, aborting pass");
                return;
            }
        };

        let mut installations = match list_installations(&app_client).await {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(error = %e, "failed to list installations, aborting pass");
                return;
            }
        };

        // OperatorAllowlist: delete disallowed installations, log-and-skip
        // on delete failure (spec §3, §4.8 step 2).
        let mut allowed = Vec::new();
        for inst in installations.drain(..) {
            if self.operator.is_allowed(&inst.account_login) {
                allowed.push(inst);
                continue;
            }
            tracing::warn!(
                installation_id = inst.id,
                account = inst.account_login,
                "installation not in operator allowlist, deleting"
            );
            if let Err(e) = delete_installation(&app_client, inst.id).await {
                tracing::error!(installation_id = inst.id, error = %e, "failed to delete installation");
            }
        }

        // Drop suspended installations (spec §3 invariant).
        let active: Vec<InstallationInfo> = allowed
            .into_iter()
            .filter(|inst| {
                if inst.suspended {
                    tracing::info!(installation_id = inst.id, "installation suspended, skipping");
                }
                !inst.suspended
            })
            .collect();

        let failure_counts: Arc<Mutex<HashMap<String, u64>>> = Arc::new(Mutex::new(HashMap::new()));
        let semaphore = Arc::new(Semaphore::new(self.operator.num_workers.max(1)));
        let mut tasks = JoinSet::new();

        for inst in active {
            let permit = semaphore.clone();
            let clients = self.clients.clone();
            let config_fetcher = self.config_fetcher.clone();
            let analysis = self.analysis.clone();
            let registry = self.registry.clone();
            let issue_tracker = self.issue_tracker.clone();
            let do_nothing = self.operator.do_nothing_on_opt_out;
            let repo_filter = self.repo_filter.clone();
            let token = self.token.clone();
            let counts = failure_counts.clone();

            tasks.spawn(async move {
                let _permit = match permit.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                if token.is_cancelled() {
                    return;
                }
                run_installation(
                    &clients,
                    &config_fetcher,
                    &analysis,
                    &registry,
                    &issue_tracker,
                    do_nothing,
                    repo_filter.as_ref(),
                    &token,
                    &inst,
                    &counts,
                )
                .await;
            });
        }

        while tasks.join_next().await.is_some() {}

        let counts = failure_counts.lock().unwrap();
        tracing::info!(failures = ?*counts, "reconciliation pass complete");
        drop(counts);

        self.clients.cache().log_size().await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_installation(
    clients: &GhClientPool,
    config_fetcher: &ConfigFetcher,
    analysis: &AnalysisContext,
    registry: &PolicyRegistry,
    issue_tracker: &IssueTracker,
    do_nothing_on_opt_out: bool,
    repo_filter: Option<&(String, String)>,
    token: &CancellationToken,
    inst: &InstallationInfo,
    failure_counts: &Mutex<HashMap<String, u64>>,
) {
    let entry = tokio::select! {
        result = clients.get(inst.id) => result,
        _ = token.cancelled() => return,
    };
    let client = match entry {
        Ok(entry) => entry.client.clone(),
        Err(e) => {
            tracing::error!(installation_id = inst.id, error = %e, "failed to acquire installation client");
            return;
        }
    };

    let repos = tokio::select! {
        result = list_repositories(&client) => result,
        _ = token.cancelled() => return,
    };
    let repos = match repos {
        Ok(repos) => repos,
        Err(e) => {
            tracing::error!(installation_id = inst.id, error = %e, "failed to list repositories");
            return;
        }
    };

    let repos: Vec<RepoInfo> = repos
        .into_iter()
        .filter(|r| !r.archived)
        .filter(|r| match repo_filter {
            Some((owner, name)) => &r.owner == owner && &r.name == name,
            None => true,
        })
        .collect();

    for repo in repos {
        if token.is_cancelled() {
            return;
        }
        let outcome = repo_evaluator::evaluate_repo(
            &client,
            config_fetcher,
            analysis,
            registry,
            issue_tracker,
            do_nothing_on_opt_out,
            &repo.owner,
            &repo.name,
        )
        .await;

        match outcome {
            Ok(outcome) => {
                let mut counts = failure_counts.lock().unwrap();
                for (policy, pass) in outcome.results {
                    if !pass {
                        *counts.entry(policy).or_insert(0) += 1;
                    }
                }
            }
            Err(e) => {
                // §7: a per-repo error aborts that repo only.
                tracing::warn!(
                    owner = repo.owner,
                    repo = repo.name,
                    error = %e,
                    "repo evaluation failed"
                );
            }
        }
    }

    // §4.8 step 4e "ClearInstLoc": this crate's Analysis Context is keyed
    // per-repo and already released inside `evaluate_repo`, so there is no
    // additional per-owner resource to release here.
}

async fn list_installations(app_client: &Octocrab) -> Result<Vec<InstallationInfo>> {
    let mut out = Vec::new();
    let mut page = 1u32;
    loop {
        let body: serde_json::Value = app_client
            .get(
                format!("/app/installations?per_page=100&page={page}"),
                None::<&()>,
            )
            .await
            .map_err(|e| crate::error::EngineError::TransientForge(e.into()))?;

        let Some(items) = body.as_array() else {
            break;
        };
        if items.is_empty() {
            break;
        }
        for item in items {
            let id = item["id"].as_i64().unwrap_or_default();
            let account_login = item["account"]["login"].as_str().unwrap_or_default().to_string();
            let suspended = !item["suspended_at"].is_null();
            out.push(InstallationInfo {
                id,
                account_login,
                suspended,
            });
        }
        page += 1;
    }
    Ok(out)
}

async fn delete_installation(app_client: &Octocrab, installation_id: i64) -> Result<()> {
    let _: serde_json::Value = app_client
        .delete(format!("/app/installations/{installation_id}"), None::<&()>)
        .await
        .map_err(|e| crate::error::EngineError::TransientForge(e.into()))?;
    Ok(())
}

async fn list_repositories(installation_client: &Octocrab) -> Result<Vec<RepoInfo>> {
    let mut out = Vec::new();
    let mut page = 1u32;
    loop {
        let body: serde_json::Value = installation_client
            .get(
                format!("/installation/repositories?per_page=100&page={page}"),
                None::<&()>,
            )
            .await
            .map_err(|e| crate::error::EngineError::TransientForge(e.into()))?;

        let Some(items) = body["repositories"].as_array() else {
            break;
        };
        if items.is_empty() {
            break;
        }
        for item in items {
            let owner = item["owner"]["login"].as_str().unwrap_or_default().to_string();
            let name = item["name"].as_str().unwrap_or_default().to_string();
            let archived = item["archived"].as_bool().unwrap_or(false);
            out.push(RepoInfo {
                owner,
                name,
                archived,
            });
        }
        page += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspended_installations_are_filtered_out() {
        let installations = vec![
            InstallationInfo {
                id: 1,
                account_login: "a".to_string(),
                suspended: true,
            },
            InstallationInfo {
                id: 2,
                account_login: "b".to_string(),
                suspended: false,
            },
        ];
        let active: Vec<_> = installations.into_iter().filter(|i| !i.suspended).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 2);
    }

    #[test]
    fn archived_repos_are_filtered_out() {
        let repos = vec![
            RepoInfo {
                owner: "o".to_string(),
                name: "kept".to_string(),
                archived: false,
            },
            RepoInfo {
                owner: "o".to_string(),
                name: "dropped".to_string(),
                archived: true,
            },
        ];
        let kept: Vec<_> = repos.into_iter().filter(|r| !r.archived).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "kept");
    }

    #[test]
    fn repo_filter_narrows_to_single_match() {
        let repos = vec![
            RepoInfo {
                owner: "o".to_string(),
                name: "a".to_string(),
                archived: false,
            },
            RepoInfo {
                owner: "o".to_string(),
                name: "b".to_string(),
                archived: false,
            },
        ];
        let filter = Some(("o".to_string(), "b".to_string()));
        let kept: Vec<_> = repos
            .into_iter()
            .filter(|r| match &filter {
                Some((owner, name)) => &r.owner == owner && &r.name == name,
                None => true,
            })
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "b");
    }
}
