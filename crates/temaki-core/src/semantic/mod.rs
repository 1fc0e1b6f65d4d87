//! Semantic model: the Tank, alias resolution, path handling and fishing

pub mod alias;
pub mod fishing;
pub mod path;

pub use alias::{AliasError, AliasTable};
pub use fishing::{FishKind, FishMetadata, Fishable, FishingContext};
pub use path::{parse_path, Bracket, PathError, PathSegment, SoftIndexOp};

use std::collections::HashMap;

use crate::ast::{Document, Entity};

/// The collection of all imported shorthand documents for one compilation
///
/// Entities are indexed by name and by id for fast lookup; cross-document
/// references resolve through the Tank after all documents are imported.
#[derive(Debug, Default)]
pub struct Tank {
    documents: Vec<Document>,
    /// (document index, entity index) by entity name
    by_name: HashMap<String, (usize, usize)>,
    /// (document index, entity index) by declared id
    by_id: HashMap<String, (usize, usize)>,
}

impl Tank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, document: Document) {
        let doc_index = self.documents.len();
        for (entity_index, entity) in document.entities.iter().enumerate() {
            let key = (doc_index, entity_index);
            self.by_name
                .entry(entity.name().to_string())
                .or_insert(key);
            if let Some(id) = entity_id(entity) {
                self.by_id.entry(id.to_string()).or_insert(key);
            }
        }
        self.documents.push(document);
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Find an entity by name or declared id
    pub fn find(&self, key: &str) -> Option<&Entity> {
        let (doc, idx) = self
            .by_name
            .get(key)
            .or_else(|| self.by_id.get(key))
            .copied()?;
        self.documents.get(doc)?.entities.get(idx)
    }

    /// Find an entity by name or id, filtered by kind
    pub fn find_of_kind(&self, key: &str, kinds: &[FishKind]) -> Option<&Entity> {
        let entity = self.find(key)?;
        if kinds.is_empty() || kinds.iter().any(|k| k.matches_entity(entity)) {
            Some(entity)
        } else {
            None
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_name.contains_key(key) || self.by_id.contains_key(key)
    }

    /// All entities across all documents, in import order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.documents.iter().flat_map(|d| d.entities.iter())
    }

    pub fn rule_set(&self, name: &str) -> Option<&crate::ast::RuleSet> {
        match self.find(name) {
            Some(Entity::RuleSet(rs)) => Some(rs),
            _ => None,
        }
    }
}

fn entity_id(entity: &Entity) -> Option<&str> {
    match entity {
        Entity::Profile(p) => p.id.as_deref(),
        Entity::Extension(x) => x.id.as_deref(),
        Entity::Instance(i) => i.id.as_deref(),
        Entity::ValueSet(v) => v.id.as_deref(),
        Entity::CodeSystem(c) => c.id.as_deref(),
        Entity::RuleSet(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Profile;

    #[test]
    fn test_tank_lookup_by_name_and_id() {
        let mut doc = Document::new("test.fsh");
        doc.entities.push(Entity::Profile(Profile {
            name: "MyPatient".to_string(),
            id: Some("my-patient".to_string()),
            parent: Some("Patient".to_string()),
            ..Default::default()
        }));

        let mut tank = Tank::new();
        tank.add_document(doc);

        assert!(tank.find("MyPatient").is_some());
        assert!(tank.find("my-patient").is_some());
        assert!(tank.find("Other").is_none());
        assert!(tank
            .find_of_kind("MyPatient", &[FishKind::Profile])
            .is_some());
        assert!(tank
            .find_of_kind("MyPatient", &[FishKind::ValueSet])
            .is_none());
    }
}
