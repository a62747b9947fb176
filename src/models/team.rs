use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's membership in a project team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub user: String,
    pub role: TeamRole,
    pub joined_at: DateTime<Utc>,
}

/// Team roles, totally ordered `Owner > Editor > Viewer`.
///
/// The ordering is what callers use for their authorization decisions; this
/// crate only stores it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Viewer,
    Editor,
    Owner,
}

impl TeamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Owner => "owner",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_form_total_order() {
        assert!(TeamRole::Owner > TeamRole::Editor);
        assert!(TeamRole::Editor > TeamRole::Viewer);
        let mut roles = vec![TeamRole::Editor, TeamRole::Owner, TeamRole::Viewer];
        roles.sort();
        assert_eq!(roles, vec![TeamRole::Viewer, TeamRole::Editor, TeamRole::Owner]);
    }
}
