//! Schema and index descriptors

use super::{EntityType, IndexId, PropertyKeyId, TokenId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which label/relationship type + property combination an index covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Node or relationship
    pub entity_type: EntityType,

    /// Label id (nodes) or relationship type id (relationships)
    pub entity_token: TokenId,

    /// Indexed property keys, in index key order
    pub property_keys: Vec<PropertyKeyId>,
}

impl SchemaDescriptor {
    /// Schema over nodes carrying `label`
    pub fn for_label(label: TokenId, property_keys: &[PropertyKeyId]) -> Self {
        Self {
            entity_type: EntityType::Node,
            entity_token: label,
            property_keys: property_keys.to_vec(),
        }
    }

    /// Schema over relationships of type `rel_type`
    pub fn for_rel_type(rel_type: TokenId, property_keys: &[PropertyKeyId]) -> Self {
        Self {
            entity_type: EntityType::Relationship,
            entity_token: rel_type,
            property_keys: property_keys.to_vec(),
        }
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.property_keys.iter().map(|k| k.to_string()).collect();
        match self.entity_type {
            EntityType::Node => write!(f, ":label[{}]({})", self.entity_token, keys.join(",")),
            EntityType::Relationship => {
                write!(f, "-[:type[{}]]-({})", self.entity_token, keys.join(","))
            }
        }
    }
}

/// A materialised index: id + name + schema + uniqueness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub id: IndexId,
    pub name: String,
    pub schema: SchemaDescriptor,

    /// Backs a uniqueness constraint
    pub unique: bool,
}

impl IndexDescriptor {
    pub fn new(id: IndexId, name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            id,
            name: name.into(),
            schema,
            unique: false,
        }
    }

    /// Same index, but backing a uniqueness constraint
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.schema.entity_type
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Index( {}, '{}', {} )", self.id, self.name, self.schema)
    }
}
