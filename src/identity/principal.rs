use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subject that matches every principal, including anonymous callers.
pub const SUBJECT_ANY: &str = "ANY";

/// Identity a permission record is assigned to. Wire form: `u:<id>`, `g:<id>`, `ANY`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    User(String),
    Group(String),
    Any,
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::User(u) => write!(f, "u:{}", u),
            Subject::Group(g) => write!(f, "g:{}", g),
            Subject::Any => f.write_str(SUBJECT_ANY),
        }
    }
}

impl FromStr for Subject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == SUBJECT_ANY {
            return Ok(Subject::Any);
        }
        match s.split_once(':') {
            Some(("u", id)) if !id.is_empty() => Ok(Subject::User(id.to_string())),
            Some(("g", id)) if !id.is_empty() => Ok(Subject::Group(id.to_string())),
            _ => Err(format!("invalid subject '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    /// `None` for anonymous callers.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Principal {
    pub fn user<S: Into<String>>(user_id: S, groups: Vec<String>) -> Self {
        Self { user_id: Some(user_id.into()), groups }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Name used in log lines.
    pub fn display_name(&self) -> &str {
        self.user_id.as_deref().unwrap_or("<anonymous>")
    }

    /// Full subject set evaluated for every permission lookup:
    /// the user, each group, and `ANY`.
    pub fn subjects(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.groups.len() + 2);
        if let Some(u) = &self.user_id {
            out.push(Subject::User(u.clone()).to_string());
        }
        for g in self.groups.iter() {
            out.push(Subject::Group(g.clone()).to_string());
        }
        out.push(Subject::Any.to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_cover_user_groups_and_any() {
        let p = Principal::user("alice", vec!["staff".into(), "ops".into()]);
        assert_eq!(p.subjects(), vec!["u:alice", "g:staff", "g:ops", "ANY"]);
        assert_eq!(Principal::anonymous().subjects(), vec!["ANY"]);
    }

    #[test]
    fn subject_wire_form() {
        assert_eq!("u:bob".parse::<Subject>().unwrap(), Subject::User("bob".into()));
        assert_eq!("g:dev".parse::<Subject>().unwrap(), Subject::Group("dev".into()));
        assert_eq!("ANY".parse::<Subject>().unwrap(), Subject::Any);
        assert!("x:1".parse::<Subject>().is_err());
        assert!("u:".parse::<Subject>().is_err());
    }
}
