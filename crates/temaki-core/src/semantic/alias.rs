//! Alias resolution
//!
//! Maps short alias names (e.g. `$SCT`) to full URLs
//! (e.g. `http://snomed.info/sct`). Aliases are collected in a first pass
//! over each document and resolved in the second; they are globally scoped
//! across a compilation.

use std::collections::HashMap;
use thiserror::Error;

use crate::ast::AliasDef;
use crate::diagnostics::SourceSpan;

/// Errors that can occur during alias operations
#[derive(Debug, Error, Clone)]
pub enum AliasError {
    #[error("Duplicate alias '{name}' maps to both '{first}' and '{second}'")]
    DuplicateAlias {
        name: String,
        first: String,
        second: String,
    },
}

/// Alias lookup table with O(1) resolution
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, AliasDef>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias; re-defining a name with a different URL is an error,
    /// re-defining it with the same URL is accepted
    pub fn add(&mut self, alias: AliasDef) -> Result<(), AliasError> {
        if let Some(existing) = self.aliases.get(&alias.name) {
            if existing.url != alias.url {
                return Err(AliasError::DuplicateAlias {
                    name: alias.name,
                    first: existing.url.clone(),
                    second: alias.url,
                });
            }
            return Ok(());
        }
        self.aliases.insert(alias.name.clone(), alias);
        Ok(())
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Resolve an alias name to its URL
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(|a| a.url.as_str())
    }

    /// Resolve a token that may be an alias; non-aliases pass through
    pub fn resolve_or_keep<'a>(&'a self, token: &'a str) -> &'a str {
        self.resolve(token).unwrap_or(token)
    }

    pub fn span_of(&self, name: &str) -> Option<&SourceSpan> {
        self.aliases.get(name).map(|a| &a.span)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
