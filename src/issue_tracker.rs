//! Issue Tracker (spec §4.7): idempotent creation, update, re-open, and
//! close of per-policy tracking issues. There is no local database —
//! identity is recovered each pass by (label, title template), spec §9's
//! explicit statelessness-by-design note.

use std::time::Duration;

use chrono::{DateTime, Utc};
use octocrab::models::issues::Issue;
use octocrab::Octocrab;

use crate::error::{EngineError, Result};

const REOPEN_COMMENT: &str = "Reopening issue, since it was detected that the policy is still failing or has started failing again.";
const UPDATE_COMMENT: &str = "Updating issue, since it was detected that the policy is still failing.";
const CLOSE_COMMENT: &str = "Policy is now in compliance. Closing issue.";

fn title_for(policy_name: &str, source_repo: Option<&str>) -> String {
    match source_repo {
        Some(repo) => format!("Allstar Policy Violation: {policy_name} ({repo})"),
        None => format!("Allstar Policy Violation: {policy_name}"),
    }
}

fn body_for(policy_name: &str, notify_text: &str, footer: Option<&str>) -> String {
    let mut body = format!(
        "This issue was automatically created by Allstar.\n\n\
         **Policy**: {policy_name}\n\n{notify_text}\n\n"
    );
    if let Some(footer) = footer {
        body.push_str(footer);
        body.push_str("\n\n");
    }
    body.push_str("See https://github.com/ossf/allstar/ for more information.");
    body
}

/// Lightweight view of an existing tracking issue's state, enough to
/// decide the `ensure` action without touching the network. Kept
/// separate from `octocrab::models::issues::Issue` so the decision rule
/// is unit-testable without constructing a full API model.
struct ExistingIssueState {
    number: u64,
    closed: bool,
    updated_at: DateTime<Utc>,
}

enum EnsureAction {
    Create,
    Reopen { number: u64 },
    Ping { number: u64 },
    NoAction,
}

/// Pure decision rule for `ensure` (spec §4.7): given whatever matching
/// issue currently exists (if any), decide what mutation, if any, to
/// perform. No I/O — this is the part of the spec's four `ensure`
/// branches that is worth testing in isolation.
fn decide_ensure_action(
    existing: Option<&ExistingIssueState>,
    now: DateTime<Utc>,
    notice_ping_duration: Duration,
) -> EnsureAction {
    match existing {
        None => EnsureAction::Create,
        Some(issue) if issue.closed => EnsureAction::Reopen {
            number: issue.number,
        },
        Some(issue) => {
            let age = now.signed_duration_since(issue.updated_at);
            let threshold = chrono::Duration::from_std(notice_ping_duration)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
            if age >= threshold {
                EnsureAction::Ping {
                    number: issue.number,
                }
            } else {
                EnsureAction::NoAction
            }
        }
    }
}

pub struct IssueTracker {
    notice_ping_duration: Duration,
}

impl IssueTracker {
    pub fn new(notice_ping_duration: Duration) -> Self {
        Self {
            notice_ping_duration,
        }
    }

    /// Search `issue_owner/issue_repo` for an open-or-closed issue carrying
    /// `label` whose title matches the policy's title template.
    async fn find_existing(
        &self,
        client: &Octocrab,
        issue_owner: &str,
        issue_repo: &str,
        policy_name: &str,
        source_repo: Option<&str>,
        label: &str,
    ) -> Result<Option<Issue>> {
        let title = title_for(policy_name, source_repo);
        let page = client
            .issues(issue_owner, issue_repo)
            .list()
            .labels(&[label.to_string()])
            .state(octocrab::params::State::All)
            .send()
            .await
            .map_err(|e| EngineError::TrackingIssue(e.into()))?;

        Ok(page.items.into_iter().find(|i| i.title == title))
    }

    /// Ensure a tracking issue exists and is up to date (spec §4.7).
    #[allow(clippy::too_many_arguments)]
    pub async fn ensure(
        &self,
        client: &Octocrab,
        target_owner: &str,
        target_repo: &str,
        issue_owner: &str,
        issue_repo: &str,
        policy_name: &str,
        notify_text: &str,
        label: &str,
        footer: Option<&str>,
    ) -> Result<()> {
        let source_repo = if issue_repo != target_repo || issue_owner != target_owner {
            Some(format!("{target_owner}/{target_repo}"))
        } else {
            None
        };

        let existing = self
            .find_existing(
                client,
                issue_owner,
                issue_repo,
                policy_name,
                source_repo.as_deref(),
                label,
            )
            .await?;

        let issues_handler = client.issues(issue_owner, issue_repo);
        let existing_state = existing.as_ref().map(|issue| ExistingIssueState {
            number: issue.number,
            closed: issue.state == octocrab::models::IssueState::Closed,
            updated_at: issue.updated_at,
        });

        match decide_ensure_action(existing_state.as_ref(), Utc::now(), self.notice_ping_duration)
        {
            EnsureAction::Create => {
                let title = title_for(policy_name, source_repo.as_deref());
                let body = body_for(policy_name, notify_text, footer);
                issues_handler
                    .create(title)
                    .body(body)
                    .labels(vec![label.to_string()])
                    .send()
                    .await
                    .map_err(|e| EngineError::TrackingIssue(e.into()))?;
            }
            EnsureAction::Reopen { number } => {
                issues_handler
                    .update(number)
                    .state(octocrab::models::IssueState::Open)
                    .send()
                    .await
                    .map_err(|e| EngineError::TrackingIssue(e.into()))?;
                issues_handler
                    .create_comment(number, REOPEN_COMMENT)
                    .await
                    .map_err(|e| EngineError::TrackingIssue(e.into()))?;
            }
            EnsureAction::Ping { number } => {
                issues_handler
                    .create_comment(number, UPDATE_COMMENT)
                    .await
                    .map_err(|e| EngineError::TrackingIssue(e.into()))?;
            }
            EnsureAction::NoAction => {}
        }

        Ok(())
    }

    /// Close the tracking issue if one exists and is open (spec §4.7).
    pub async fn close(
        &self,
        client: &Octocrab,
        issue_owner: &str,
        issue_repo: &str,
        policy_name: &str,
        target_owner: &str,
        target_repo: &str,
        label: &str,
    ) -> Result<()> {
        let source_repo = if issue_repo != target_repo || issue_owner != target_owner {
            Some(format!("{target_owner}/{target_repo}"))
        } else {
            None
        };

        let existing = self
            .find_existing(
                client,
                issue_owner,
                issue_repo,
                policy_name,
                source_repo.as_deref(),
                label,
            )
            .await?;

        let Some(issue) = existing else {
            return Ok(());
        };
        if issue.state == octocrab::models::IssueState::Closed {
            return Ok(());
        }

        let issues_handler = client.issues(issue_owner, issue_repo);
        issues_handler
            .create_comment(issue.number, CLOSE_COMMENT)
            .await
            .map_err(|e| EngineError::TrackingIssue(e.into()))?;
        issues_handler
            .update(issue.number)
            .state(octocrab::models::IssueState::Closed)
            .send()
            .await
            .map_err(|e| EngineError::TrackingIssue(e.into()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_embeds_source_repo_when_redirected() {
        let t = title_for("branch_protection", Some("owner/repo"));
        assert!(t.contains("owner/repo"));
        let t2 = title_for("branch_protection", None);
        assert!(!t2.contains('('));
    }

    #[test]
    fn body_includes_notify_text_and_optional_footer() {
        let body = body_for("p", "violation details", Some("contact us"));
        assert!(body.contains("violation details"));
        assert!(body.contains("contact us"));

        let body_no_footer = body_for("p", "violation details", None);
        assert!(!body_no_footer.contains("contact us"));
    }

    fn ping_duration() -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    #[test]
    fn no_existing_issue_creates() {
        let action = decide_ensure_action(None, Utc::now(), ping_duration());
        assert!(matches!(action, EnsureAction::Create));
    }

    #[test]
    fn closed_issue_reopens_regardless_of_age() {
        let issue = ExistingIssueState {
            number: 7,
            closed: true,
            updated_at: Utc::now(),
        };
        let action = decide_ensure_action(Some(&issue), Utc::now(), ping_duration());
        assert!(matches!(action, EnsureAction::Reopen { number: 7 }));
    }

    #[test]
    fn fresh_open_issue_is_left_alone() {
        let issue = ExistingIssueState {
            number: 3,
            closed: false,
            updated_at: Utc::now(),
        };
        let action = decide_ensure_action(Some(&issue), Utc::now(), ping_duration());
        assert!(matches!(action, EnsureAction::NoAction));
    }

    #[test]
    fn stale_open_issue_is_pinged() {
        let issue = ExistingIssueState {
            number: 3,
            closed: false,
            updated_at: Utc::now() - chrono::Duration::hours(25),
        };
        let action = decide_ensure_action(Some(&issue), Utc::now(), ping_duration());
        assert!(matches!(action, EnsureAction::Ping { number: 3 }));
    }

    #[test]
    fn age_exactly_at_threshold_pings() {
        let now = Utc::now();
        let issue = ExistingIssueState {
            number: 9,
            closed: false,
            updated_at: now - chrono::Duration::hours(24),
        };
        let action = decide_ensure_action(Some(&issue), now, ping_duration());
        assert!(matches!(action, EnsureAction::Ping { number: 9 }));
    }

    #[test]
    fn repeated_create_decision_is_idempotent_given_the_created_issue() {
        // First pass: nothing exists, so the decision is Create.
        let first = decide_ensure_action(None, Utc::now(), ping_duration());
        assert!(matches!(first, EnsureAction::Create));

        // Second pass, immediately after: the issue now exists, open and
        // fresh, so the decision is NoAction rather than another Create —
        // `ensure` is idempotent across back-to-back calls.
        let created = ExistingIssueState {
            number: 1,
            closed: false,
            updated_at: Utc::now(),
        };
        let second = decide_ensure_action(Some(&created), Utc::now(), ping_duration());
        assert!(matches!(second, EnsureAction::NoAction));
    }
}
