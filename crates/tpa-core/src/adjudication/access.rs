use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::domain::UserId;
use super::error::TransitionBlock;

/// Role names used by the default transition tables.
pub mod roles {
    pub const INSURANCE_ADMIN: &str = "INSURANCE_ADMIN";
    pub const REVIEWER: &str = "REVIEWER";
    pub const EMPLOYER_ADMIN: &str = "EMPLOYER_ADMIN";
    pub const PROVIDER: &str = "PROVIDER";
    pub const FINANCE: &str = "FINANCE";
}

/// Opaque role name supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    System,
}

/// Identity and capability set of whoever triggers a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<UserId>,
    pub username: String,
    pub roles: BTreeSet<Role>,
    pub super_admin: bool,
    pub kind: ActorKind,
}

impl Actor {
    pub fn user<I, R>(user_id: UserId, username: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            user_id: Some(user_id),
            username: username.into(),
            roles: roles.into_iter().map(|role| Role(role.into())).collect(),
            super_admin: false,
            kind: ActorKind::User,
        }
    }

    pub fn with_super_admin(mut self, super_admin: bool) -> Self {
        self.super_admin = super_admin;
        self
    }

    /// Scheduled or internal process acting without a human identity.
    pub fn system(process: impl Into<String>) -> Self {
        Self {
            user_id: None,
            username: process.into(),
            roles: BTreeSet::new(),
            super_admin: false,
            kind: ActorKind::System,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == ActorKind::System
    }

    pub fn holds_any(&self, required: &BTreeSet<Role>) -> bool {
        self.roles.iter().any(|role| required.contains(role))
    }

    /// Single role label stamped on audit rows.
    pub fn audit_role(&self) -> String {
        if self.is_system() {
            return "SYSTEM".to_string();
        }
        if self.super_admin {
            return "SUPER_ADMIN".to_string();
        }
        self.roles
            .iter()
            .next()
            .map(|role| role.0.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

/// Who may traverse a single edge of a state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeAuthorization {
    Roles(BTreeSet<Role>),
    SystemOnly,
}

/// Edge table for a state machine: reachability and the roles authorized per edge.
///
/// The table is plain data so the machines never embed role names in their control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRoles<S: Ord> {
    edges: BTreeMap<(S, S), EdgeAuthorization>,
}

impl<S: Ord> Default for TransitionRoles<S> {
    fn default() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }
}

impl<S: Copy + Ord> TransitionRoles<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, from: S, to: S, roles: &[&str]) -> Self {
        let roles = roles.iter().map(|role| Role::new(*role)).collect();
        self.edges.insert((from, to), EdgeAuthorization::Roles(roles));
        self
    }

    pub fn system_only(mut self, from: S, to: S) -> Self {
        self.edges.insert((from, to), EdgeAuthorization::SystemOnly);
        self
    }

    pub fn edge(&self, from: S, to: S) -> Option<&EdgeAuthorization> {
        self.edges.get(&(from, to))
    }

    pub fn is_reachable(&self, from: S, to: S) -> bool {
        self.edges.contains_key(&(from, to))
    }

    /// Check the actor against an edge.
    ///
    /// Super-admins skip the role check on human edges; system-only edges accept the
    /// system actor alone.
    pub fn authorize(&self, from: S, to: S, actor: &Actor) -> Result<(), TransitionBlock> {
        match self.edge(from, to) {
            None => Err(TransitionBlock::Unreachable),
            Some(EdgeAuthorization::SystemOnly) => {
                if actor.is_system() {
                    Ok(())
                } else {
                    Err(TransitionBlock::SystemOnly)
                }
            }
            Some(EdgeAuthorization::Roles(required)) => {
                if actor.super_admin || (!actor.is_system() && actor.holds_any(required)) {
                    Ok(())
                } else {
                    Err(TransitionBlock::RoleRequired {
                        required: required.iter().cloned().collect(),
                    })
                }
            }
        }
    }
}
