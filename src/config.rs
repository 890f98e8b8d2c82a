//! Operator Config (spec §4.1): process-wide static configuration read
//! once from the environment at startup. Values never change at runtime;
//! unparseable integers/booleans/durations fall back to their documented
//! default rather than failing the process.

use std::time::Duration;

const DEFAULT_APP_ID: i64 = 119816;
const DEFAULT_KEY_SECRET: &str = "projects/365991372897/secrets/allstar-private-key";
const DEFAULT_NOTICE_PING_HOURS: u64 = 24;
const DEFAULT_NUM_WORKERS: usize = 5;

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub app_id: i64,
    pub key_secret_uri: String,
    pub private_key: Option<Vec<u8>>,
    pub ghe_url: Option<String>,
    pub do_nothing_on_opt_out: bool,
    pub notice_ping_duration: Duration,
    pub allowed_orgs: Vec<String>,
    pub num_workers: usize,
}

impl OperatorConfig {
    /// Build from the process environment. Individual fields fall back to
    /// their default on parse failure; this function itself never fails.
    pub fn from_env() -> Self {
        let app_id = read_env("APP_ID")
            .and_then(|v| parse_or_warn("APP_ID", &v))
            .unwrap_or(DEFAULT_APP_ID);

        let key_secret_uri =
            read_env("KEY_SECRET").unwrap_or_else(|| DEFAULT_KEY_SECRET.to_string());

        let private_key = read_env("PRIVATE_KEY").map(|v| v.into_bytes());

        let ghe_url = read_env("ALLSTAR_GHE_URL");

        let do_nothing_on_opt_out = read_env("DO_NOTHING_ON_OPT_OUT")
            .and_then(|v| parse_bool_or_warn("DO_NOTHING_ON_OPT_OUT", &v))
            .unwrap_or(false);

        let notice_ping_hours = read_env("NOTICE_PING_DURATION_HOURS")
            .and_then(|v| parse_or_warn::<u64>("NOTICE_PING_DURATION_HOURS", &v))
            .filter(|&h| h != 0)
            .unwrap_or(DEFAULT_NOTICE_PING_HOURS);

        let allowed_orgs = read_env("GITHUB_ALLOWED_ORGS")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default();

        let num_workers = read_env("ALLSTAR_NUM_WORKERS")
            .and_then(|v| parse_or_warn::<usize>("ALLSTAR_NUM_WORKERS", &v))
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_NUM_WORKERS);

        Self {
            app_id,
            key_secret_uri,
            private_key,
            ghe_url,
            do_nothing_on_opt_out,
            notice_ping_duration: Duration::from_secs(notice_ping_hours * 3600),
            allowed_orgs,
            num_workers,
        }
    }

    /// `OperatorAllowlist` as described in spec §3: empty means "allow all".
    pub fn is_allowed(&self, account_login: &str) -> bool {
        if self.allowed_orgs.is_empty() {
            return true;
        }
        if self.allowed_orgs.len() == 1 && self.allowed_orgs[0].is_empty() {
            return true;
        }
        self.allowed_orgs.iter().any(|o| o == account_login)
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, raw, "failed to parse env var, using default");
            None
        }
    }
}

fn parse_bool_or_warn(key: &str, raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => {
            tracing::warn!(key, raw, "failed to parse bool env var, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_ping_zero_falls_back_to_default() {
        // OperatorConfig::from_env reads process env, which tests should
        // not mutate concurrently; exercise the parsing helper directly.
        let hours = parse_or_warn::<u64>("NOTICE_PING_DURATION_HOURS", "0")
            .filter(|&h| h != 0)
            .unwrap_or(DEFAULT_NOTICE_PING_HOURS);
        assert_eq!(hours, DEFAULT_NOTICE_PING_HOURS);
    }

    #[test]
    fn empty_allowlist_means_allow_all() {
        let cfg = OperatorConfig {
            allowed_orgs: vec![],
            ..sample()
        };
        assert!(cfg.is_allowed("anyone"));
    }

    #[test]
    fn single_empty_element_means_allow_all() {
        let cfg = OperatorConfig {
            allowed_orgs: vec![String::new()],
            ..sample()
        };
        assert!(cfg.is_allowed("anyone"));
    }

    #[test]
    fn trailing_empty_preserved() {
        let orgs: Vec<String> = "org-1,".split(',').map(str::to_string).collect();
        assert_eq!(orgs, vec!["org-1".to_string(), String::new()]);
    }

    #[test]
    fn populated_allowlist_excludes_others() {
        let cfg = OperatorConfig {
            allowed_orgs: vec!["org-1".to_string()],
            ..sample()
        };
        assert!(cfg.is_allowed("org-1"));
        assert!(!cfg.is_allowed("org-2"));
    }

    fn sample() -> OperatorConfig {
        OperatorConfig {
            app_id: DEFAULT_APP_ID,
            key_secret_uri: DEFAULT_KEY_SECRET.to_string(),
            private_key: None,
            ghe_url: None,
            do_nothing_on_opt_out: false,
            notice_ping_duration: Duration::from_secs(DEFAULT_NOTICE_PING_HOURS * 3600),
            allowed_orgs: vec![],
            num_workers: DEFAULT_NUM_WORKERS,
        }
    }
}
