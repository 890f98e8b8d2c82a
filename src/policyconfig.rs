//! Config Fetcher (spec §4.3): reads the three-tier policy configuration
//! and merges it, plus the engine's `IsEnabled` rule.
//!
//! The three-layer override semantics are grounded in `repo_roller`'s
//! `config_manager::organization` hierarchy (template > team > repo-type
//! > global, each value carrying whether lower layers may override it) —
//! generalized here to Allstar's flatter org > org-per-repo > repo chain,
//! where the override control lives at the org layer as a single
//! `disable_repo_override` flag rather than per-field.
//!
//! `fetch_layer` is backed by the shared `ResponseCache` (spec §3, §4.2):
//! each config file is keyed by `owner/repo/path` and served from cache on
//! repeat reads, since the same three files are re-fetched for every
//! policy on every repo. Cross-pass staleness here is acceptable and
//! intended by the spec; it is not used for the engine's installation or
//! repository enumeration, which must reflect live state every pass.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Deserialize;

use crate::error::Result;
use crate::github::cache::ResponseCache;

const ORG_CONFIG_REPO_SUFFIX: &str = ".github";
const DEFAULT_ORG_CONFIG_DIR: &str = "allstar";
const DEFAULT_REPO_CONFIG_DIR: &str = ".allstar";
const DEFAULT_LABEL: &str = "allstar";

/// One layer of opt-in/opt-out configuration, as read from a single file.
/// Absent fields mean "not specified at this layer".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptConfig {
    pub opt_in_strategy: Option<bool>,
    pub opt_out_strategy: Option<bool>,
    #[serde(default)]
    pub opt_out_repos: HashSet<String>,
    #[serde(default)]
    pub opt_in_repos: HashSet<String>,
    pub disable_repo_override: Option<bool>,
    /// Repo-level-only: explicit opt-in assertion ("optIn: true").
    pub opt_in: Option<bool>,
}

/// Action to take when a policy fails (spec §3 `PolicyConfig`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Log,
    Issue,
    Email,
    Fix,
    #[serde(other)]
    Unknown,
}

/// One layer of a policy's configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfigLayer {
    pub action: Option<PolicyAction>,
    #[serde(flatten)]
    pub opt_config: OptConfig,
    pub issue_repo: Option<String>,
    pub issue_label: Option<String>,
    pub issue_footer: Option<String>,
}

/// The three raw layers read off the wire for one (owner, repo, policy).
#[derive(Debug, Clone, Default)]
pub struct PolicyConfigLayers {
    pub org: PolicyConfigLayer,
    pub org_per_repo: PolicyConfigLayer,
    pub repo: PolicyConfigLayer,
}

/// The merged, effective view handed to policies and the engine.
#[derive(Debug, Clone)]
pub struct MergedPolicyConfig {
    pub action: PolicyAction,
    pub opt_config: OptConfig,
    pub issue_repo: Option<String>,
    pub issue_label: String,
    pub issue_footer: Option<String>,
}

impl PolicyConfigLayers {
    /// Merge org → org-per-repo → repo, skipping the repo layer entirely
    /// when the org layer sets `disableRepoOverride`.
    pub fn merge(&self) -> MergedPolicyConfig {
        let disable_repo_override = self.org.opt_config.disable_repo_override.unwrap_or(false);

        let mut opt_config = self.org.opt_config.clone();
        merge_opt_config(&mut opt_config, &self.org_per_repo.opt_config);
        if !disable_repo_override {
            merge_opt_config(&mut opt_config, &self.repo.opt_config);
        }

        let mut action = self.org.action.clone();
        if let Some(a) = self.org_per_repo.action.clone() {
            action = Some(a);
        }
        if !disable_repo_override {
            if let Some(a) = self.repo.action.clone() {
                action = Some(a);
            }
        }

        let mut issue_repo = self.org.issue_repo.clone();
        issue_repo = self.org_per_repo.issue_repo.clone().or(issue_repo);
        if !disable_repo_override {
            issue_repo = self.repo.issue_repo.clone().or(issue_repo);
        }

        let mut issue_label = self.org.issue_label.clone();
        issue_label = self.org_per_repo.issue_label.clone().or(issue_label);
        if !disable_repo_override {
            issue_label = self.repo.issue_label.clone().or(issue_label);
        }

        let mut issue_footer = self.org.issue_footer.clone();
        issue_footer = self.org_per_repo.issue_footer.clone().or(issue_footer);
        if !disable_repo_override {
            issue_footer = self.repo.issue_footer.clone().or(issue_footer);
        }

        MergedPolicyConfig {
            action: action.unwrap_or(PolicyAction::Log),
            opt_config,
            issue_repo,
            issue_label: issue_label.unwrap_or_else(|| DEFAULT_LABEL.to_string()),
            issue_footer,
        }
    }
}

fn merge_opt_config(base: &mut OptConfig, overlay: &OptConfig) {
    if let Some(v) = overlay.opt_in_strategy {
        base.opt_in_strategy = Some(v);
    }
    if let Some(v) = overlay.opt_out_strategy {
        base.opt_out_strategy = Some(v);
    }
    base.opt_out_repos.extend(overlay.opt_out_repos.iter().cloned());
    base.opt_in_repos.extend(overlay.opt_in_repos.iter().cloned());
    if let Some(v) = overlay.disable_repo_override {
        base.disable_repo_override = Some(v);
    }
    if let Some(v) = overlay.opt_in {
        base.opt_in = Some(v);
    }
}

impl MergedPolicyConfig {
    /// The engine's `IsEnabled` function (spec §4.3).
    pub fn is_enabled(&self, repo: &str) -> bool {
        let opt_out_strategy = self.opt_config.opt_out_strategy.unwrap_or(true);

        if opt_out_strategy {
            !self.opt_config.opt_out_repos.contains(repo)
        } else {
            self.opt_config.opt_in_repos.contains(repo) || self.opt_config.opt_in.unwrap_or(false)
        }
    }
}

/// Reads and parses a single config layer. A missing file is not an
/// error: it yields the zero-valued layer. A parse error is logged and
/// also yields the zero-valued layer.
///
/// Config files are re-read often — every policy, for every repo, every
/// pass — and change far less often than that, so a hit in `cache` skips
/// the Contents API call entirely (spec §3: the `ResponseCache` "persists
/// across passes within a process lifetime"). Unlike the installation and
/// repository enumeration the engine does once per pass, a stale config
/// layer here is a minor, self-correcting staleness rather than a missed
/// suspension or archival.
async fn fetch_layer(
    client: &Octocrab,
    cache: &ResponseCache,
    owner: &str,
    repo: &str,
    path: &str,
) -> PolicyConfigLayer {
    let cache_key = format!("config:{owner}/{repo}/{path}");

    let raw = if let Some(bytes) = cache.get(&cache_key).await {
        Some(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        let content = match client
            .repos(owner, repo)
            .get_content()
            .path(path)
            .send()
            .await
        {
            Ok(mut page) => match page.take_items().into_iter().next() {
                Some(item) => item.decoded_content(),
                None => None,
            },
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => {
                None
            }
            Err(e) => {
                tracing::debug!(owner, repo, path, error = %e, "config fetch error, treating as absent");
                None
            }
        };

        if let Some(raw) = &content {
            cache.set(cache_key, raw.clone().into_bytes()).await;
        }
        content
    };

    let Some(raw) = raw else {
        return PolicyConfigLayer::default();
    };

    match serde_yaml::from_str(&lowercase_keys(&raw)) {
        Ok(layer) => layer,
        Err(e) => {
            tracing::warn!(owner, repo, path, error = %e, "config parse error, using zero layer");
            PolicyConfigLayer::default()
        }
    }
}

/// Config keys are case-insensitive (spec §6). `serde_yaml` is not, so we
/// lower-case every mapping key before handing the document to `serde`.
fn lowercase_keys(raw: &str) -> String {
    let Ok(mut value) = serde_yaml::from_str::<serde_yaml::Value>(raw) else {
        return raw.to_string();
    };
    lowercase_keys_in_value(&mut value);
    serde_yaml::to_string(&value).unwrap_or_else(|_| raw.to_string())
}

fn lowercase_keys_in_value(value: &mut serde_yaml::Value) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            let entries: Vec<_> = std::mem::take(map).into_iter().collect();
            for (mut k, mut v) in entries {
                if let serde_yaml::Value::String(s) = &k {
                    k = serde_yaml::Value::String(s.to_ascii_lowercase());
                }
                lowercase_keys_in_value(&mut v);
                map.insert(k, v);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                lowercase_keys_in_value(item);
            }
        }
        _ => {}
    }
}

/// Seam between the Repo Evaluator and wherever merged policy config comes
/// from. `ConfigFetcher` is the real, network-backed implementation; test
/// code can supply a canned source instead so evaluator tests don't need a
/// live GitHub API.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(
        &self,
        client: &Octocrab,
        owner: &str,
        repo: &str,
        policy_file: &str,
    ) -> Result<MergedPolicyConfig>;
}

pub struct ConfigFetcher {
    org_config_dir: String,
    repo_config_dir: String,
    cache: Arc<ResponseCache>,
}

impl Default for ConfigFetcher {
    fn default() -> Self {
        Self::new(Arc::new(ResponseCache::new()))
    }
}

impl ConfigFetcher {
    /// `cache` is normally the engine's shared `GhClientPool::cache()` so
    /// config reads and the pool's other cached traffic share one bound.
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self {
            org_config_dir: DEFAULT_ORG_CONFIG_DIR.to_string(),
            repo_config_dir: DEFAULT_REPO_CONFIG_DIR.to_string(),
            cache,
        }
    }

    /// Fetch and merge all three layers for one (owner, repo, policy-file).
    pub async fn fetch(
        &self,
        client: &Octocrab,
        owner: &str,
        repo: &str,
        policy_file: &str,
    ) -> Result<MergedPolicyConfig> {
        let org_path = format!("{}/{}", self.org_config_dir, policy_file);
        let org_per_repo_path = format!("{}/{}/{}", self.org_config_dir, repo, policy_file);
        let repo_path = format!("{}/{}", self.repo_config_dir, policy_file);

        let org = fetch_layer(client, &self.cache, owner, ORG_CONFIG_REPO_SUFFIX, &org_path).await;
        let org_per_repo = fetch_layer(
            client,
            &self.cache,
            owner,
            ORG_CONFIG_REPO_SUFFIX,
            &org_per_repo_path,
        )
        .await;
        let repo_layer = fetch_layer(client, &self.cache, owner, repo, &repo_path).await;

        let layers = PolicyConfigLayers {
            org,
            org_per_repo,
            repo: repo_layer,
        };
        Ok(layers.merge())
    }

    /// The engine-level opt-in/opt-out check for a repo/policy, convenience
    /// wrapper combining `fetch` and `is_enabled`.
    pub async fn is_enabled(
        &self,
        client: &Octocrab,
        owner: &str,
        repo: &str,
        policy_file: &str,
    ) -> Result<bool> {
        let merged = self.fetch(client, owner, repo, policy_file).await?;
        Ok(merged.is_enabled(repo))
    }
}

#[async_trait]
impl ConfigSource for ConfigFetcher {
    async fn fetch(
        &self,
        client: &Octocrab,
        owner: &str,
        repo: &str,
        policy_file: &str,
    ) -> Result<MergedPolicyConfig> {
        ConfigFetcher::fetch(self, client, owner, repo, policy_file).await
    }
}
