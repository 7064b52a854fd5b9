//! Schema-aware table index.
//!
//! Built once per database listing, the index maps every plausible textual
//! representation of a table — bracketed, schema-qualified, or bare under the
//! default schema — back to a single canonical descriptor. Later insertions
//! for an already-registered key are rejected (first-registered wins) so that
//! lookups stay deterministic when names collide.

use std::collections::HashMap;

use crate::provider::TableInfo;

/// One known table in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Table name without qualification, original casing.
    pub name: String,
    /// Owning schema, original casing (default schema when unspecified).
    pub schema: String,
    /// Canonical `[schema].[name]` form used in results.
    pub fully_qualified: String,
}

/// Lookup structure over all textual variants of the known tables.
#[derive(Debug, Default)]
pub struct TableIndex {
    descriptors: Vec<TableDescriptor>,
    by_variant: HashMap<String, usize>,
    schema_prefixes: Vec<String>,
}

impl TableIndex {
    /// Build the index from a database listing.
    ///
    /// `schema_prefixes` is the configurable guess list used to recover bare
    /// references in deployments with a recognizable schema convention; the
    /// default schema is always tried first.
    pub fn build(tables: &[TableInfo], default_schema: &str, schema_prefixes: &[String]) -> Self {
        let mut prefixes: Vec<String> = vec![default_schema.to_uppercase()];
        for prefix in schema_prefixes {
            let upper = prefix.to_uppercase();
            if !prefixes.contains(&upper) {
                prefixes.push(upper);
            }
        }

        let mut index = TableIndex {
            descriptors: Vec::with_capacity(tables.len()),
            by_variant: HashMap::with_capacity(tables.len() * 6),
            schema_prefixes: prefixes,
        };

        for table in tables {
            let schema = table
                .schema
                .clone()
                .unwrap_or_else(|| default_schema.to_string());
            let descriptor = TableDescriptor {
                fully_qualified: format!("[{}].[{}]", schema, table.name),
                name: table.name.clone(),
                schema,
            };
            index.insert(descriptor);
        }

        index
    }

    fn insert(&mut self, descriptor: TableDescriptor) {
        let id = self.descriptors.len();
        let name = descriptor.name.to_uppercase();
        let schema = descriptor.schema.to_uppercase();

        // Cartesian set of {bare, schema-qualified} x {bracketed, unbracketed}.
        // The bare forms are the default-schema-assumed variants.
        let variants = [
            name.clone(),
            format!("[{}]", name),
            format!("{}.{}", schema, name),
            format!("[{}].[{}]", schema, name),
            format!("{}.[{}]", schema, name),
            format!("[{}].{}", schema, name),
        ];
        for variant in variants {
            self.register(variant, id);
        }

        self.descriptors.push(descriptor);
    }

    /// Register one variant key; an already-taken key is left untouched.
    fn register(&mut self, key: String, id: usize) {
        self.by_variant.entry(key).or_insert(id);
    }

    /// Resolve a single textual token to a descriptor id.
    ///
    /// Tries, in order: exact match; match after stripping brackets; and for
    /// single-part tokens, each configured schema prefix qualifying the token.
    pub fn find_id(&self, token: &str) -> Option<usize> {
        let trimmed = token.trim().trim_end_matches('.');
        if trimmed.is_empty() {
            return None;
        }
        let upper = trimmed.to_uppercase();
        if let Some(&id) = self.by_variant.get(&upper) {
            return Some(id);
        }

        let stripped: String = upper.chars().filter(|&c| c != '[' && c != ']').collect();
        if let Some(&id) = self.by_variant.get(&stripped) {
            return Some(id);
        }

        if !stripped.contains('.') {
            for prefix in &self.schema_prefixes {
                if let Some(&id) = self.by_variant.get(&format!("{}.{}", prefix, stripped)) {
                    return Some(id);
                }
            }
        }

        None
    }

    /// Resolve a token to its descriptor.
    pub fn find(&self, token: &str) -> Option<&TableDescriptor> {
        self.find_id(token).map(|id| &self.descriptors[id])
    }

    /// Resolve an already-split `schema`, `name` pair (the `ident . ident`
    /// token sequence recognized by the multi-part matcher).
    pub fn find_parts(&self, schema: &str, name: &str) -> Option<usize> {
        let key = format!(
            "{}.{}",
            strip_brackets(schema).to_uppercase(),
            strip_brackets(name).to_uppercase()
        );
        self.by_variant.get(&key).copied()
    }

    pub fn descriptor(&self, id: usize) -> &TableDescriptor {
        &self.descriptors[id]
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// All registered variant keys with their owning descriptor ids.
    /// Used by the presence-only analysis tier.
    pub fn variant_keys(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_variant.iter().map(|(k, &id)| (k.as_str(), id))
    }
}

/// Strips brackets `[]` and double quotes `""` from an identifier.
pub fn strip_brackets(ident: &str) -> &str {
    ident
        .trim()
        .trim_matches(|c| c == '[' || c == ']' || c == '"')
}
