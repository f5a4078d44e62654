//! Write-policy decision tree. Pure, no I/O, no clock reads beyond what
//! the caller passes in. `decide` is the single place the check order and
//! reason-token spelling are allowed to live; they are part of the stable
//! audit vocabulary and must not be renamed.

use engram_schemas::{SpaceId, SpaceKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    Redirect,
    Reject,
}

#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub reason: String,
    pub original_space: String,
    pub final_space: String,
}

#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub team_write_enabled: bool,
    pub allowlist_users: Vec<String>,
    pub allowed_kinds: Vec<String>,
    pub require_evidence: bool,
    pub max_chars: usize,
    pub bulk_mode: BulkMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMode {
    VeryShort,
    Reject,
    Allow,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            team_write_enabled: false,
            allowlist_users: Vec::new(),
            allowed_kinds: vec![
                "PROCEDURE".to_string(),
                "REVIEW_GUIDE".to_string(),
                "PITFALL".to_string(),
                "DECISION".to_string(),
            ],
            require_evidence: true,
            max_chars: 1200,
            bulk_mode: BulkMode::VeryShort,
        }
    }
}

pub struct WriteRequest<'a> {
    pub target_space: &'a str,
    pub actor_user_id: Option<&'a str>,
    pub payload_md: &'a str,
    pub kind: Option<&'a str>,
    pub evidence_refs_present: bool,
    pub is_bulk: bool,
}

/// `target_space` unparsed as `team:`/`org:`/`private:` short-circuits to
/// `unknown_space_type` (reject). Private spaces always allow. Team/org
/// spaces run the full check chain in order, each failure redirecting to
/// the caller's private space rather than rejecting outright.
pub fn decide(settings: &PolicySettings, req: &WriteRequest) -> PolicyDecision {
    let private_space = match req.actor_user_id {
        Some(user_id) => format!("private:{user_id}"),
        None => "private:unknown".to_string(),
    };

    let Some(space) = SpaceId::parse(req.target_space) else {
        return PolicyDecision {
            action: PolicyAction::Reject,
            reason: "unknown_space_type".to_string(),
            original_space: req.target_space.to_string(),
            final_space: req.target_space.to_string(),
        };
    };

    if space.kind == SpaceKind::Private {
        return PolicyDecision {
            action: PolicyAction::Allow,
            reason: "private_space".to_string(),
            original_space: req.target_space.to_string(),
            final_space: req.target_space.to_string(),
        };
    }

    check_team_policy(settings, req, &private_space)
}

fn redirect(reason: impl Into<String>, original: &str, private_space: &str) -> PolicyDecision {
    PolicyDecision {
        action: PolicyAction::Redirect,
        reason: reason.into(),
        original_space: original.to_string(),
        final_space: private_space.to_string(),
    }
}

fn check_team_policy(settings: &PolicySettings, req: &WriteRequest, private_space: &str) -> PolicyDecision {
    let original = req.target_space;

    if !settings.team_write_enabled {
        return redirect("team_write_disabled", original, private_space);
    }

    if !settings.allowlist_users.is_empty() {
        let allowed = req
        .actor_user_id
        .map(|user_id| settings.allowlist_users.iter().any(|u| u == user_id))
        .unwrap_or(false);
        if !allowed {
            return redirect("user_not_in_allowlist", original, private_space);
        }
    }

    if let Some(kind) = req.kind {
        if !settings.allowed_kinds.is_empty() && !settings.allowed_kinds.iter().any(|k| k == kind) {
            return redirect(format!("kind_not_allowed:{kind}"), original, private_space);
        }
    }

    if settings.require_evidence && !req.evidence_refs_present {
        return redirect("missing_evidence", original, private_space);
    }

    let len = req.payload_md.chars().count();
    if len > settings.max_chars {
        return redirect(format!("exceeds_max_chars:{len}>{}", settings.max_chars), original, private_space);
    }

    if req.is_bulk {
        match settings.bulk_mode {
            BulkMode::VeryShort if len > 200 => return redirect("bulk_too_long", original, private_space),
            BulkMode::Reject => return redirect("bulk_not_allowed", original, private_space),
            _ => {}
        }
    }

    PolicyDecision {
        action: PolicyAction::Allow,
        reason: "policy_passed".to_string(),
        original_space: original.to_string(),
        final_space: original.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req<'a>(target_space: &'a str, actor: Option<&'a str>, payload: &'a str) -> WriteRequest<'a> {
        WriteRequest {
            target_space,
            actor_user_id: actor,
            payload_md: payload,
            kind: Some("DECISION"),
            evidence_refs_present: true,
            is_bulk: false,
        }
    }

    #[test]
    fn private_space_always_allows() {
        let settings = PolicySettings::default();
        let decision = decide(&settings, &req("private:u1", Some("u1"), "hi"));
        assert_eq!(decision.action, PolicyAction::Allow);
        assert_eq!(decision.reason, "private_space");
    }

    #[test]
    fn unknown_space_prefix_rejects() {
        let settings = PolicySettings::default();
        let decision = decide(&settings, &req("wiki:acme", Some("u1"), "hi"));
        assert_eq!(decision.action, PolicyAction::Reject);
        assert_eq!(decision.reason, "unknown_space_type");
    }

    #[test]
    fn team_write_disabled_redirects_first() {
        let settings = PolicySettings::default();
        let decision = decide(&settings, &req("team:acme", Some("u1"), "hi"));
        assert_eq!(decision.action, PolicyAction::Redirect);
        assert_eq!(decision.reason, "team_write_disabled");
        assert_eq!(decision.final_space, "private:u1");
    }

    #[test]
    fn allowlist_check_runs_before_kind_check() {
        let mut settings = PolicySettings::default();
        settings.team_write_enabled = true;
        settings.allowlist_users = vec!["u2".to_string()];
        let decision = decide(&settings, &req("team:acme", Some("u1"), "hi"));
        assert_eq!(decision.reason, "user_not_in_allowlist");
    }

    #[test]
    fn kind_not_allowed_carries_the_kind_in_the_reason() {
        let mut settings = PolicySettings::default();
        settings.team_write_enabled = true;
        let mut request = req("team:acme", Some("u1"), "hi");
        request.kind = Some("FACT");
        let decision = decide(&settings, &request);
        assert_eq!(decision.reason, "kind_not_allowed:FACT");
    }

    #[test]
    fn missing_evidence_redirects() {
        let mut settings = PolicySettings::default();
        settings.team_write_enabled = true;
        let mut request = req("team:acme", Some("u1"), "hi");
        request.evidence_refs_present = false;
        let decision = decide(&settings, &request);
        assert_eq!(decision.reason, "missing_evidence");
    }

    #[test]
    fn exceeds_max_chars_carries_both_lengths() {
        let mut settings = PolicySettings::default();
        settings.team_write_enabled = true;
        settings.max_chars = 5;
        let decision = decide(&settings, &req("team:acme", Some("u1"), "123456"));
        assert_eq!(decision.reason, "exceeds_max_chars:6>5");
    }

    #[test]
    fn bulk_very_short_mode_rejects_long_bulk_payloads() {
        let mut settings = PolicySettings::default();
        settings.team_write_enabled = true;
        let long_payload = "x".repeat(201);
        let mut request = req("team:acme", Some("u1"), &long_payload);
        request.is_bulk = true;
        let decision = decide(&settings, &request);
        assert_eq!(decision.reason, "bulk_too_long");
    }

    #[test]
    fn all_checks_pass_yields_policy_passed() {
        let mut settings = PolicySettings::default();
        settings.team_write_enabled = true;
        let decision = decide(&settings, &req("team:acme", Some("u1"), "hi"));
        assert_eq!(decision.action, PolicyAction::Allow);
        assert_eq!(decision.reason, "policy_passed");
    }
}
