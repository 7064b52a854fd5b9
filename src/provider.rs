//! External collaborator seam.
//!
//! The engine consumes exactly two capabilities from its environment: listing
//! the tables of a database and fetching the raw definition text of a stored
//! object. Hosts implement [`SchemaProvider`] over whatever driver they use;
//! the analyzer treats provider failures as recoverable diagnostics.

/// One table as reported by the schema enumeration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Table name without schema qualification.
    pub name: String,
    /// Owning schema; `None` means the deployment default (usually `dbo`).
    pub schema: Option<String>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
        }
    }

    pub fn with_schema(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Some(schema.into()),
        }
    }
}

/// Environment capabilities consumed by the analyzer.
///
/// Implementations may perform I/O; both methods are invoked only at the
/// analyzer's defined suspension points, before any parsing begins.
pub trait SchemaProvider: Send + Sync {
    /// Enumerate the tables of `database`.
    fn list_tables(&self, database: &str) -> anyhow::Result<Vec<TableInfo>>;

    /// Fetch the raw source text of a named object.
    ///
    /// Returns `Ok(None)` for objects with no textual definition (base tables,
    /// encrypted objects); that is a valid terminal state, not an error.
    fn get_object_definition(
        &self,
        database: &str,
        object_name: &str,
    ) -> anyhow::Result<Option<String>>;
}
