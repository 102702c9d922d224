//! Anchor identity and reference ids
//!
//! A reference id is the canonical string form of an anchor's identity,
//! `<n|e|w|o>:<TypeName>:<24-hex-id>`. Every cross-object link in storage
//! uses this form.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::Collection;
use crate::types::{Result, StoreError};

/// The four anchor variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorKind {
    Node,
    Edge,
    Walker,
    Object,
}

impl AnchorKind {
    pub const ALL: [AnchorKind; 4] = [
        AnchorKind::Node,
        AnchorKind::Edge,
        AnchorKind::Walker,
        AnchorKind::Object,
    ];

    /// Single-letter prefix used in reference ids
    pub fn letter(&self) -> char {
        match self {
            AnchorKind::Node => 'n',
            AnchorKind::Edge => 'e',
            AnchorKind::Walker => 'w',
            AnchorKind::Object => 'o',
        }
    }

    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.to_ascii_lowercase().as_str() {
            "n" => Some(AnchorKind::Node),
            "e" => Some(AnchorKind::Edge),
            "w" => Some(AnchorKind::Walker),
            "o" => Some(AnchorKind::Object),
            _ => None,
        }
    }

    /// Collection holding anchors of this kind
    pub fn collection(&self) -> Collection {
        match self {
            AnchorKind::Node => Collection::Node,
            AnchorKind::Edge => Collection::Edge,
            AnchorKind::Walker => Collection::Walker,
            AnchorKind::Object => Collection::Object,
        }
    }

    /// Display name used in log lines and error messages
    pub fn label(&self) -> &'static str {
        match self {
            AnchorKind::Node => "NodeAnchor",
            AnchorKind::Edge => "EdgeAnchor",
            AnchorKind::Walker => "WalkerAnchor",
            AnchorKind::Object => "ObjectAnchor",
        }
    }
}

impl fmt::Display for AnchorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of an anchor without its data.
///
/// This is the stub form: graph links hold `AnchorRef`s and the memory cache
/// resolves them to loaded anchors on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorRef {
    pub kind: AnchorKind,
    pub name: String,
    pub id: ObjectId,
}

impl AnchorRef {
    pub fn new(kind: AnchorKind, name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            kind,
            name: name.into(),
            id,
        }
    }

    /// Root node reference, `n::<id>`
    pub fn root(id: ObjectId) -> Self {
        Self::new(AnchorKind::Node, "", id)
    }

    /// Canonical reference id
    pub fn ref_id(&self) -> String {
        format!("{}:{}:{}", self.kind.letter(), self.name, self.id.to_hex())
    }

    /// Parse a reference id of any kind
    pub fn parse(ref_id: &str) -> Result<Self> {
        let invalid = || StoreError::InvalidReference(ref_id.to_string());

        let mut parts = ref_id.splitn(3, ':');
        let (Some(letter), Some(name), Some(hex)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let kind = AnchorKind::from_letter(letter).ok_or_else(invalid)?;
        if hex.len() != 24 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let id = ObjectId::parse_str(hex.to_ascii_lowercase()).map_err(|_| invalid())?;

        Ok(Self::new(kind, name, id))
    }

    /// Parse a reference id that must be of `kind`
    pub fn parse_kind(ref_id: &str, kind: AnchorKind) -> Result<Self> {
        let parsed = Self::parse(ref_id)?;
        if parsed.kind != kind {
            return Err(StoreError::InvalidReference(ref_id.to_string()));
        }
        Ok(parsed)
    }
}

impl fmt::Display for AnchorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind.letter(), self.name, self.id.to_hex())
    }
}

impl FromStr for AnchorRef {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
