//! Command-line surface (spec §6). Flag/env parsing itself is out of
//! scope for the engine proper but still needs a concrete binary
//! entry point; `clap` is the pack's dominant choice for this.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "allstar-reconciler", about = "GitHub policy reconciliation engine")]
pub struct Cli {
    /// Run a single reconciliation pass and exit.
    #[arg(long)]
    pub once: bool,

    /// Restrict this invocation to a single registered policy.
    #[arg(long)]
    pub policy: Option<String>,

    /// Restrict this invocation to one repository (owner/name).
    #[arg(long)]
    pub repo: Option<String>,
}

impl Cli {
    /// Parses `--repo owner/name` into its two parts, if set.
    pub fn repo_filter(&self) -> Option<(String, String)> {
        let (owner, name) = self.repo.as_ref()?.split_once('/')?;
        Some((owner.to_string(), name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_filter_splits_owner_and_name() {
        let cli = Cli {
            once: false,
            policy: None,
            repo: Some("owner/name".to_string()),
        };
        assert_eq!(
            cli.repo_filter(),
            Some(("owner".to_string(), "name".to_string()))
        );
    }

    #[test]
    fn repo_filter_absent_when_unset() {
        let cli = Cli {
            once: false,
            policy: None,
            repo: None,
        };
        assert_eq!(cli.repo_filter(), None);
    }

    #[test]
    fn repo_filter_malformed_without_slash_is_none() {
        let cli = Cli {
            once: false,
            policy: None,
            repo: Some("not-a-slug".to_string()),
        };
        assert_eq!(cli.repo_filter(), None);
    }
}
