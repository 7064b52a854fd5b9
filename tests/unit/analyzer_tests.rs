use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use pretty_assertions::assert_eq;
use sql_depscan::provider::{SchemaProvider, TableInfo};
use sql_depscan::{AnalyzerOptions, DependencyAnalyzer, DiagnosticCode};

/// In-memory catalog standing in for a live database.
#[derive(Default)]
struct FakeCatalog {
    tables: Vec<TableInfo>,
    definitions: HashMap<String, String>,
    fail_list: bool,
    fail_fetch: bool,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeCatalog {
    fn new() -> Self {
        let mut definitions = HashMap::new();
        definitions.insert(
            "ORDERSUMMARY".to_string(),
            "CREATE VIEW dbo.OrderSummary AS \
             SELECT c.Name, o.Total FROM Orders o \
             JOIN Customers c ON c.Id = o.CustomerId"
                .to_string(),
        );
        definitions.insert(
            "USP_ARCHIVE".to_string(),
            "INSERT INTO Archive (Id) SELECT Id FROM Orders; \
             DELETE FROM Orders WHERE Age > 30"
                .to_string(),
        );
        definitions.insert(
            "WITHCTE".to_string(),
            "WITH Recent AS (SELECT * FROM Orders) SELECT * FROM Recent".to_string(),
        );
        Self {
            tables: vec![
                TableInfo::new("Orders"),
                TableInfo::new("Customers"),
                TableInfo::new("Archive"),
            ],
            definitions,
            ..Self::default()
        }
    }
}

impl SchemaProvider for FakeCatalog {
    fn list_tables(&self, _database: &str) -> anyhow::Result<Vec<TableInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(anyhow!("catalog unreachable"));
        }
        Ok(self.tables.clone())
    }

    fn get_object_definition(
        &self,
        _database: &str,
        object_name: &str,
    ) -> anyhow::Result<Option<String>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch {
            return Err(anyhow!("definition fetch timed out"));
        }
        Ok(self.definitions.get(&object_name.to_uppercase()).cloned())
    }
}

fn analyzer() -> DependencyAnalyzer<FakeCatalog> {
    DependencyAnalyzer::new(FakeCatalog::new())
}

#[test]
fn view_analysis_reports_selected_tables() {
    let result = analyzer().analyze_dependencies("warehouse", "OrderSummary");
    assert_eq!(result.metadata.strategy, "enhanced");
    assert_eq!(result.metadata.confidence, 1.0);
    let names: Vec<&str> = result
        .depends_on
        .iter()
        .map(|r| r.referenced_object.as_str())
        .collect();
    assert_eq!(names, vec!["[dbo].[Customers]", "[dbo].[Orders]"]);
    assert!(result.depends_on.iter().all(|r| r.is_selected));
    assert!(result.referenced_by.is_empty());
}

#[test]
fn procedure_analysis_sets_write_flags() {
    let result = analyzer().analyze_dependencies("warehouse", "usp_Archive");
    let archive = result
        .depends_on
        .iter()
        .find(|r| r.referenced_object == "[dbo].[Archive]")
        .unwrap();
    assert!(archive.is_insert_all);
    let orders = result
        .depends_on
        .iter()
        .find(|r| r.referenced_object == "[dbo].[Orders]")
        .unwrap();
    assert!(orders.is_delete);
    assert!(orders.is_selected);
}

#[test]
fn cte_names_never_surface_in_results() {
    let result = analyzer().analyze_dependencies("warehouse", "WithCte");
    let names: Vec<&str> = result
        .depends_on
        .iter()
        .map(|r| r.referenced_object.as_str())
        .collect();
    assert_eq!(names, vec!["[dbo].[Orders]"]);
}

#[test]
fn analysis_is_idempotent_across_analyzer_instances() {
    let a = analyzer().analyze_dependencies("warehouse", "OrderSummary");
    let b = analyzer().analyze_dependencies("warehouse", "OrderSummary");
    assert_eq!(a, b);
}

#[test]
fn missing_definition_is_a_confident_empty_result() {
    let result = analyzer().analyze_dependencies("warehouse", "PlainTable");
    assert!(result.depends_on.is_empty());
    assert_eq!(result.metadata.strategy, "none");
    assert_eq!(result.metadata.confidence, 1.0);
    assert_eq!(
        result.metadata.diagnostics[0].code,
        DiagnosticCode::EmptyDefinition
    );
}

#[test]
fn blank_arguments_are_rejected_without_touching_the_provider() {
    let engine = analyzer();
    let result = engine.analyze_dependencies("", "OrderSummary");
    assert_eq!(result.metadata.confidence, 0.0);
    assert_eq!(
        result.metadata.diagnostics[0].code,
        DiagnosticCode::InvalidInput
    );
    assert_eq!(engine.provider().fetch_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn fetch_failure_becomes_a_diagnostic_and_is_not_cached() {
    let mut catalog = FakeCatalog::new();
    catalog.fail_fetch = true;
    let engine = DependencyAnalyzer::new(catalog);
    for _ in 0..2 {
        let result = engine.analyze_dependencies("warehouse", "OrderSummary");
        assert_eq!(result.metadata.confidence, 0.0);
        assert_eq!(
            result.metadata.diagnostics[0].code,
            DiagnosticCode::ExternalFetchError
        );
    }
    // Both attempts reached the provider; failures are never memoized.
    assert_eq!(engine.provider().fetch_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn list_failure_becomes_a_diagnostic() {
    let mut catalog = FakeCatalog::new();
    catalog.fail_list = true;
    let engine = DependencyAnalyzer::new(catalog);
    let result = engine.analyze_dependencies("warehouse", "OrderSummary");
    assert_eq!(result.metadata.confidence, 0.0);
    assert_eq!(
        result.metadata.diagnostics[0].code,
        DiagnosticCode::ExternalFetchError
    );
}

#[test]
fn repeat_analysis_is_served_from_cache() {
    let engine = analyzer();
    let first = engine.analyze_dependencies("warehouse", "OrderSummary");
    let second = engine.analyze_dependencies("warehouse", "OrderSummary");
    assert_eq!(first, second);
    assert_eq!(engine.provider().fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache_stats().hits, 1);
}

#[test]
fn table_listing_is_reused_across_objects_in_a_database() {
    let engine = analyzer();
    engine.analyze_dependencies("warehouse", "OrderSummary");
    engine.analyze_dependencies("warehouse", "usp_Archive");
    assert_eq!(engine.provider().list_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn clear_cache_forces_refetch() {
    let engine = analyzer();
    engine.analyze_dependencies("warehouse", "OrderSummary");
    engine.clear_cache(Some("warehouse"));
    engine.analyze_dependencies("warehouse", "OrderSummary");
    assert_eq!(engine.provider().fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.provider().list_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn expired_results_are_recomputed() {
    let options = AnalyzerOptions {
        cache_ttl: Duration::ZERO,
        ..AnalyzerOptions::default()
    };
    let engine = DependencyAnalyzer::with_options(FakeCatalog::new(), options);
    engine.analyze_dependencies("warehouse", "OrderSummary");
    std::thread::sleep(Duration::from_millis(2));
    engine.analyze_dependencies("warehouse", "OrderSummary");
    assert_eq!(engine.provider().fetch_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn non_ascii_identifiers_never_escape_as_errors() {
    let mut catalog = FakeCatalog::new();
    catalog.definitions.insert(
        "INTL".to_string(),
        "SELECT * FROM Orders, [Commandés] WHERE 1 = 1".to_string(),
    );
    let engine = DependencyAnalyzer::new(catalog);
    let result = engine.analyze_dependencies("warehouse", "Intl");
    assert_eq!(result.metadata.strategy, "enhanced");
    let orders = result
        .depends_on
        .iter()
        .find(|r| r.referenced_object == "[dbo].[Orders]")
        .unwrap();
    assert!(orders.is_selected);
}

#[test]
fn oversized_definition_still_produces_a_result() {
    let mut catalog = FakeCatalog::new();
    catalog.definitions.insert(
        "BIG".to_string(),
        format!("SELECT * FROM Orders WHERE Note = 'x' {}", " ".repeat(64)),
    );
    let options = AnalyzerOptions {
        max_definition_bytes: 40,
        ..AnalyzerOptions::default()
    };
    let engine = DependencyAnalyzer::with_options(catalog, options);
    let result = engine.analyze_dependencies("warehouse", "Big");
    assert!(result
        .metadata
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::InputTruncated));
    assert_eq!(result.depends_on.len(), 1);
}
