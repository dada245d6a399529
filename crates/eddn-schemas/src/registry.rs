use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::Schema;
use crate::schemas::{
    CodexEntrySchema, FileheaderSchema, JournalSchema, ScientificResearchSchema,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("schemas {first} and {second} both claim record type {tag}")]
    DuplicateTag {
        tag: String,
        first: &'static str,
        second: &'static str,
    },
}

/// Tag-to-schema table, built once at startup from an explicit list. A tag
/// claimed by two schemas fails the build outright instead of one silently
/// winning, so routing stays unambiguous for the life of the process.
pub struct SchemaRegistry {
    by_tag: HashMap<String, Arc<dyn Schema>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("tag_count", &self.by_tag.len())
            .finish()
    }
}

impl SchemaRegistry {
    pub fn build(schemas: Vec<Arc<dyn Schema>>) -> Result<Self, RegistryError> {
        let mut by_tag: HashMap<String, Arc<dyn Schema>> = HashMap::new();
        for schema in schemas {
            for tag in schema.owned_tags() {
                if let Some(existing) = by_tag.get(*tag) {
                    return Err(RegistryError::DuplicateTag {
                        tag: (*tag).to_string(),
                        first: existing.name(),
                        second: schema.name(),
                    });
                }
                by_tag.insert((*tag).to_string(), schema.clone());
            }
        }
        Ok(Self { by_tag })
    }

    /// The production schema set.
    pub fn standard() -> Result<Self, RegistryError> {
        Self::build(vec![
            Arc::new(FileheaderSchema),
            Arc::new(JournalSchema),
            Arc::new(CodexEntrySchema),
            Arc::new(ScientificResearchSchema),
        ])
    }

    /// At most one schema per tag, by construction.
    pub fn get(&self, tag: &str) -> Option<&Arc<dyn Schema>> {
        self.by_tag.get(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.by_tag.keys().map(String::as_str).collect();
        tags.sort();
        tags
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }
}
