//! Target-space parsing: `team:<project>`, `private:<user>`, `org:shared`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceKind {
    Team,
    Private,
    Org,
}

/// A parsed `target_space` value, e.g. `team:acme` or `private:u123`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceId {
    pub kind: SpaceKind,
    pub scope: String,
}

impl SpaceId {
    pub fn team(project_key: impl Into<String>) -> Self {
        Self {
            kind: SpaceKind::Team,
            scope: project_key.into(),
        }
    }

    pub fn private(user_id: impl Into<String>) -> Self {
        Self {
            kind: SpaceKind::Private,
            scope: user_id.into(),
        }
    }

    pub fn org_shared() -> Self {
        Self {
            kind: SpaceKind::Org,
            scope: "shared".to_string(),
        }
    }

    /// Parses `"<kind>:<scope>"`. Returns `None` for an unrecognized kind
    /// prefix; callers map that to the `unknown_space_type` reason token.
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, scope) = raw.split_once(':')?;
        let kind = match kind {
            "team" => SpaceKind::Team,
            "private" => SpaceKind::Private,
            "org" => SpaceKind::Org,
            _ => return None,
        };
        Some(Self {
                kind,
                scope: scope.to_string(),
        })
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SpaceKind::Team => "team",
            SpaceKind::Private => "private",
            SpaceKind::Org => "org",
        };
        write!(f, "{kind}:{}", self.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_team_space() {
        let s = SpaceId::team("acme");
        assert_eq!(SpaceId::parse(&s.to_string()), Some(s));
    }

    #[test]
    fn rejects_unknown_kind() {
        assert_eq!(SpaceId::parse("wiki:acme"), None);
    }
}
