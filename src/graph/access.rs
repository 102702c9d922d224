//! Permission model and access-level resolution
//!
//! Every anchor carries a [`Permission`]: a default level granted to any
//! requester plus per-root overrides keyed by the requester root's reference
//! id. [`resolve_access_level`] computes what the current root may do with a
//! target anchor.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::graph::reference::AnchorRef;
use crate::types::{Result, StoreError};

/// Ordered permission tier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    #[default]
    NoAccess,
    Read,
    /// May attach or detach edges without touching content
    Connect,
    Write,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::NoAccess => "NO_ACCESS",
            AccessLevel::Read => "READ",
            AccessLevel::Connect => "CONNECT",
            AccessLevel::Write => "WRITE",
        }
    }

    /// Numeric form, NO_ACCESS = -1 through WRITE = 2
    pub fn as_i32(&self) -> i32 {
        match self {
            AccessLevel::NoAccess => -1,
            AccessLevel::Read => 0,
            AccessLevel::Connect => 1,
            AccessLevel::Write => 2,
        }
    }

    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            -1 => Ok(AccessLevel::NoAccess),
            0 => Ok(AccessLevel::Read),
            1 => Ok(AccessLevel::Connect),
            2 => Ok(AccessLevel::Write),
            other => Err(StoreError::Validation(format!("Invalid access level: {}", other))),
        }
    }

    pub fn can_read(&self) -> bool {
        *self > AccessLevel::NoAccess
    }

    pub fn can_connect(&self) -> bool {
        *self > AccessLevel::Read
    }

    pub fn can_write(&self) -> bool {
        *self > AccessLevel::Connect
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = StoreError;

    /// Accepts level names (any case) and their numeric forms
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO_ACCESS" => Ok(AccessLevel::NoAccess),
            "READ" => Ok(AccessLevel::Read),
            "CONNECT" => Ok(AccessLevel::Connect),
            "WRITE" => Ok(AccessLevel::Write),
            other => other
                .parse::<i32>()
                .map_err(|_| StoreError::Validation(format!("Invalid access level: {}", s)))
                .and_then(Self::from_i32),
        }
    }
}

/// Per-root grants, keyed by root reference id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    #[serde(default)]
    pub anchors: BTreeMap<String, AccessLevel>,
}

impl Access {
    /// Level granted to `ref_id`, NO_ACCESS when absent
    pub fn check(&self, ref_id: &str) -> AccessLevel {
        self.anchors.get(ref_id).copied().unwrap_or_default()
    }
}

/// Anchor access handler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub all: AccessLevel,
    #[serde(default)]
    pub roots: Access,
}

impl Permission {
    pub fn with_all(all: AccessLevel) -> Self {
        Self {
            all,
            roots: Access::default(),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// The root a request acts as, plus the system root that bypasses checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub root: AnchorRef,
    pub system_root: ObjectId,
}

impl Requester {
    pub fn new(root: AnchorRef, system_root: ObjectId) -> Self {
        Self { root, system_root }
    }

    /// Requester acting as the system root itself
    pub fn system(system_root: ObjectId) -> Self {
        Self::new(AnchorRef::root(system_root), system_root)
    }

    pub fn is_system(&self) -> bool {
        self.root.id == self.system_root
    }
}

/// The parts of a target anchor access resolution looks at
#[derive(Debug, Clone, Copy)]
pub struct AccessTarget<'a> {
    pub id: ObjectId,
    pub root: Option<ObjectId>,
    pub persistent: bool,
    pub access: &'a Permission,
}

/// Effective level the requester holds over `target`.
///
/// `owner` is the permission of the target's owning root when it is loaded.
/// Grants found after the first non-zero level never stack on top of it.
pub fn resolve_access_level(
    requester: &Requester,
    target: AccessTarget<'_>,
    owner: Option<&Permission>,
) -> AccessLevel {
    if !target.persistent {
        return AccessLevel::Write;
    }

    if requester.is_system()
        || Some(requester.root.id) == target.root
        || requester.root.id == target.id
    {
        return AccessLevel::Write;
    }

    let requester_ref = requester.root.ref_id();
    let mut level = AccessLevel::NoAccess;

    if target.access.all > AccessLevel::NoAccess {
        level = target.access.all;
    }

    if target.root.is_some() {
        if let Some(owner) = owner {
            if owner.all > level {
                level = owner.all;
            }

            let granted = owner.roots.check(&requester_ref);
            if granted > AccessLevel::NoAccess && level == AccessLevel::NoAccess {
                level = granted;
            }
        }
    }

    let granted = target.access.roots.check(&requester_ref);
    if granted > AccessLevel::NoAccess && level == AccessLevel::NoAccess {
        level = granted;
    }

    level
}
