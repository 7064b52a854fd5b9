//! sql-depscan: heuristic table-dependency analysis for SQL object definitions
//!
//! Analyzes the stored source text of views, procedures, and functions to
//! discover which tables each object reads from or writes to, without a full
//! query-optimizer-grade parser. Definitions are normalized, matched against a
//! schema-aware index of known tables, and walked by tiered strategies of
//! decreasing sophistication; every result carries a confidence score and a
//! diagnostic trail instead of pretending to be ground truth.
//!
//! The engine consumes two capabilities from its environment via
//! [`SchemaProvider`]: listing the tables of a database and fetching raw
//! definition text. Everything else — the host application, drivers,
//! rendering — stays outside.

pub mod cache;
pub mod error;
pub mod extractor;
pub mod index;
pub mod normalizer;
pub mod provider;
pub mod resolver;
pub mod result;
pub mod strategy;
pub mod util;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

pub use cache::{CacheStats, ResultCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use error::{AnalysisError, Diagnostic, DiagnosticCode};
pub use index::{TableDescriptor, TableIndex};
pub use normalizer::DEFAULT_MAX_DEFINITION_BYTES;
pub use provider::{SchemaProvider, TableInfo};
pub use resolver::{Operation, TableUsage};
pub use result::{AnalysisMetadata, AnalysisResult, TableUsageRecord};
pub use strategy::Strategy;

use error::DiagnosticCode as Code;

/// Options for a dependency analyzer.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Schema assumed for unqualified table names (e.g., "dbo").
    pub default_schema: String,
    /// Schema prefixes tried when resolving bare single-part references.
    /// Environment-specific; the default assumes only the default schema.
    pub schema_prefixes: Vec<String>,
    /// Size guard applied before normalization.
    pub max_definition_bytes: usize,
    /// Time-to-live for cached results and table indexes.
    pub cache_ttl: Duration,
    /// Maximum number of cached analysis results.
    pub cache_capacity: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            default_schema: "dbo".to_string(),
            schema_prefixes: vec!["dbo".to_string()],
            max_definition_bytes: DEFAULT_MAX_DEFINITION_BYTES,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

struct IndexEntry {
    index: Arc<TableIndex>,
    built_at: Instant,
}

/// The analysis engine. One instance may serve concurrent requests; all
/// per-call parsing state is local, and the caches serialize writes per key.
pub struct DependencyAnalyzer<P> {
    provider: P,
    options: AnalyzerOptions,
    cache: ResultCache,
    indexes: DashMap<String, IndexEntry>,
}

impl<P: SchemaProvider> DependencyAnalyzer<P> {
    pub fn new(provider: P) -> Self {
        Self::with_options(provider, AnalyzerOptions::default())
    }

    pub fn with_options(provider: P, options: AnalyzerOptions) -> Self {
        let cache = ResultCache::new(options.cache_ttl, options.cache_capacity);
        Self {
            provider,
            options,
            cache,
            indexes: DashMap::new(),
        }
    }

    /// Analyze which tables a stored object depends on.
    ///
    /// Never returns an error and never panics on malformed input: every
    /// failure mode is folded into the result's metadata as diagnostics with
    /// an appropriate confidence. Results are cached per (database, object)
    /// until the configured TTL elapses.
    pub fn analyze_dependencies(&self, database: &str, object_name: &str) -> AnalysisResult {
        if database.trim().is_empty() || object_name.trim().is_empty() {
            return AnalysisResult::empty(
                "none",
                0.0,
                vec![Diagnostic::new(
                    Code::InvalidInput,
                    "database and object name must be non-empty",
                )],
            );
        }

        if let Some(hit) = self.cache.get(database, object_name) {
            return hit;
        }
        debug!(database, object = object_name, "analysis cache miss");

        let definition = match self.provider.get_object_definition(database, object_name) {
            Ok(definition) => definition,
            Err(err) => {
                return AnalysisResult::empty(
                    "none",
                    0.0,
                    vec![Diagnostic::new(
                        Code::ExternalFetchError,
                        format!("definition fetch failed: {err:#}"),
                    )],
                );
            }
        };
        let Some(definition) = definition.filter(|d| !d.trim().is_empty()) else {
            // No source text is a correct answer ("no dependencies"), not an
            // error: base tables and encrypted objects land here.
            let result = AnalysisResult::empty(
                "none",
                1.0,
                vec![Diagnostic::new(
                    Code::EmptyDefinition,
                    "object has no textual definition",
                )],
            );
            self.cache.put(database, object_name, result.clone());
            return result;
        };

        let index = match self.table_index(database) {
            Ok(index) => index,
            Err(err) => {
                return AnalysisResult::empty(
                    "none",
                    0.0,
                    vec![Diagnostic::new(
                        Code::ExternalFetchError,
                        format!("table listing failed: {err}"),
                    )],
                );
            }
        };

        let norm = normalizer::normalize(&definition, self.options.max_definition_bytes);
        let outcome = strategy::analyze(&norm, &index);

        let mut diagnostics = norm.diagnostics.clone();
        diagnostics.extend(outcome.diagnostics);
        let strategy_name = outcome.strategy.map(|s| s.name()).unwrap_or("none");
        let result = AnalysisResult::from_usages(
            outcome.usages,
            &index,
            strategy_name,
            outcome.confidence,
            diagnostics,
        );

        // Cache only results a strategy fully completed; an abandoned or
        // wholly failed request never leaves a partial entry behind.
        if outcome.strategy.is_some() {
            self.cache.put(database, object_name, result.clone());
        }
        result
    }

    /// Fetch or rebuild the per-database table index. Descriptor sets are
    /// rebuilt on TTL expiry, not per analysis.
    fn table_index(&self, database: &str) -> Result<Arc<TableIndex>, AnalysisError> {
        let key = database.to_uppercase();
        if let Some(entry) = self.indexes.get(&key) {
            if entry.built_at.elapsed() <= self.options.cache_ttl {
                return Ok(Arc::clone(&entry.index));
            }
        }

        let tables =
            self.provider
                .list_tables(database)
                .map_err(|source| AnalysisError::ExternalFetch {
                    operation: format!("list_tables({database})"),
                    source,
                })?;
        debug!(database, tables = tables.len(), "rebuilt table index");
        let index = Arc::new(TableIndex::build(
            &tables,
            &self.options.default_schema,
            &self.options.schema_prefixes,
        ));
        self.indexes.insert(
            key,
            IndexEntry {
                index: Arc::clone(&index),
                built_at: Instant::now(),
            },
        );
        Ok(index)
    }

    /// Drop cached results (and the table index) for one database, or for
    /// everything when `database` is None.
    pub fn clear_cache(&self, database: Option<&str>) {
        self.cache.invalidate(database);
        match database {
            Some(db) => {
                self.indexes.remove(&db.to_uppercase());
            }
            None => self.indexes.clear(),
        }
    }

    /// Operability counters for the result cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}
