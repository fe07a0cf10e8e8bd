//! Live schema snapshot used as LLM context
//!
//! A schema is an ordered mapping from entity (table or collection) name to
//! its ordered field names. It is rebuilt from the engine on every generate
//! action and never persisted.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One table or collection with its fields in engine order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entities: Vec<Entity>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity, replacing the fields of an existing one with the same name
    pub fn insert(&mut self, name: impl Into<String>, fields: Vec<String>) {
        let name = name.into();
        match self.entities.iter_mut().find(|e| e.name == name) {
            Some(entity) => entity.fields = fields,
            None => self.entities.push(Entity { name, fields }),
        }
    }

    /// Append one field, creating the entity on first sight
    pub fn push_field(&mut self, entity: &str, field: impl Into<String>) {
        match self.entities.iter_mut().rev().find(|e| e.name == entity) {
            Some(existing) => existing.fields.push(field.into()),
            None => self.entities.push(Entity {
                name: entity.to_string(),
                fields: vec![field.into()],
            }),
        }
    }

    pub fn fields(&self, entity: &str) -> Option<&[String]> {
        self.entities
            .iter()
            .find(|e| e.name == entity)
            .map(|e| e.fields.as_slice())
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Pretty JSON object form, as shown to the user before asking a question
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entities.len()))?;
        for entity in &self.entities {
            map.serialize_entry(&entity.name, &entity.fields)?;
        }
        map.end()
    }
}

impl<N, F, S> FromIterator<(N, F)> for Schema
where
    N: Into<String>,
    F: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, F)>>(iter: T) -> Self {
        let mut schema = Schema::new();
        for (name, fields) in iter {
            schema.insert(name, fields.into_iter().map(Into::into).collect());
        }
        schema
    }
}
