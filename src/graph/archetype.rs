//! Business objects wrapped by anchors
//!
//! User types implement [`Archetype`] and are registered in an
//! [`ArchetypeRegistry`] so stored documents decode back into them by their
//! type name.

use bson::Document;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

use crate::graph::reference::AnchorKind;
use crate::types::Result;

/// A user-defined node, edge, walker or object type
pub trait Archetype: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    const KIND: AnchorKind;

    /// Type name stored as the document discriminator
    const NAME: &'static str;
}

/// Object-safe view of an archetype held by an anchor
pub trait DynArchetype: fmt::Debug + Send + Sync {
    fn kind(&self) -> AnchorKind;

    fn type_name(&self) -> &str;

    /// Serialized field map, stored under `archetype` in the document
    fn to_fields(&self) -> Result<Document>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Archetype> DynArchetype for T {
    fn kind(&self) -> AnchorKind {
        T::KIND
    }

    fn type_name(&self) -> &str {
        T::NAME
    }

    fn to_fields(&self) -> Result<Document> {
        Ok(bson::to_document(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// =============================================================================
// Built-in archetypes
// =============================================================================

/// Per-tenant graph root
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Root {}

impl Archetype for Root {
    const KIND: AnchorKind = AnchorKind::Node;
    const NAME: &'static str = "";
}

/// Edge without a user-defined type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericEdge {}

impl Archetype for GenericEdge {
    const KIND: AnchorKind = AnchorKind::Edge;
    const NAME: &'static str = "";
}

/// Stored archetype whose type name is not registered; keeps the raw fields
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownArchetype {
    pub kind: AnchorKind,
    pub name: String,
    pub fields: Document,
}

impl DynArchetype for UnknownArchetype {
    fn kind(&self) -> AnchorKind {
        self.kind
    }

    fn type_name(&self) -> &str {
        &self.name
    }

    fn to_fields(&self) -> Result<Document> {
        Ok(self.fields.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// =============================================================================
// Registry
// =============================================================================

type Decoder = fn(Document) -> Result<Box<dyn DynArchetype>>;

fn decode_as<T: Archetype>(fields: Document) -> Result<Box<dyn DynArchetype>> {
    Ok(Box::new(bson::from_document::<T>(fields)?))
}

/// Maps `(kind, type name)` to a decoder
#[derive(Clone)]
pub struct ArchetypeRegistry {
    decoders: HashMap<(AnchorKind, String), Decoder>,
}

impl Default for ArchetypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchetypeRegistry {
    /// Registry holding the built-in `Root` and `GenericEdge`
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };
        registry.register::<Root>();
        registry.register::<GenericEdge>();
        registry
    }

    pub fn register<T: Archetype>(&mut self) -> &mut Self {
        self.decoders
            .insert((T::KIND, T::NAME.to_string()), decode_as::<T> as Decoder);
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<T: Archetype>(mut self) -> Self {
        self.register::<T>();
        self
    }

    pub fn contains(&self, kind: AnchorKind, name: &str) -> bool {
        self.decoders.contains_key(&(kind, name.to_string()))
    }

    /// Decode stored fields, falling back to [`UnknownArchetype`]
    pub fn decode(&self, kind: AnchorKind, name: &str, fields: Document) -> Result<Box<dyn DynArchetype>> {
        match self.decoders.get(&(kind, name.to_string())) {
            Some(decoder) => decoder(fields),
            None => {
                warn!(kind = %kind, name = name, "Can't find archetype. Defaulting to base type.");
                Ok(Box::new(UnknownArchetype {
                    kind,
                    name: name.to_string(),
                    fields,
                }))
            }
        }
    }
}

impl fmt::Debug for ArchetypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("ArchetypeRegistry").field("types", &names).finish()
    }
}
