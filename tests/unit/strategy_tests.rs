use pretty_assertions::assert_eq;
use sql_depscan::index::TableIndex;
use sql_depscan::normalizer::{normalize, DEFAULT_MAX_DEFINITION_BYTES};
use sql_depscan::provider::TableInfo;
use sql_depscan::resolver::Operation;
use sql_depscan::strategy::{analyze, Strategy};

fn index() -> TableIndex {
    TableIndex::build(
        &[
            TableInfo::new("Orders"),
            TableInfo::new("Customers"),
            TableInfo::new("Audit"),
        ],
        "dbo",
        &[],
    )
}

fn run(sql: &str) -> sql_depscan::strategy::StrategyOutcome {
    let norm = normalize(sql, DEFAULT_MAX_DEFINITION_BYTES);
    analyze(&norm, &index())
}

#[test]
fn realistic_view_body_resolves_at_full_confidence() {
    let outcome = run(
        "CREATE VIEW dbo.OrderSummary AS\n\
         SELECT c.Name, COUNT(*) AS Cnt\n\
         FROM Orders o\n\
         INNER JOIN Customers c ON c.Id = o.CustomerId\n\
         GROUP BY c.Name",
    );
    assert_eq!(outcome.strategy, Some(Strategy::Enhanced));
    assert_eq!(outcome.confidence, 1.0);
    assert_eq!(outcome.usages.len(), 2);
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn procedure_with_writes_and_dynamic_sql() {
    let idx = index();
    let outcome = run(
        "UPDATE Orders SET Total = 0;\n\
         EXEC('TRUNCATE TABLE Audit')",
    );
    assert_eq!(outcome.strategy, Some(Strategy::Enhanced));
    let audit = outcome
        .usages
        .iter()
        .find(|u| u.table_id == idx.find_id("Audit").unwrap())
        .unwrap();
    assert_eq!(
        audit.operations.iter().collect::<Vec<_>>(),
        vec![&Operation::DynamicSql]
    );
}

#[test]
fn empty_index_yields_success_with_no_usages() {
    let norm = normalize("SELECT * FROM Orders", DEFAULT_MAX_DEFINITION_BYTES);
    let idx = TableIndex::build(&[], "dbo", &[]);
    let outcome = analyze(&norm, &idx);
    assert_eq!(outcome.strategy, Some(Strategy::Enhanced));
    assert!(outcome.usages.is_empty());
}

#[test]
fn whitespace_only_input_is_a_clean_empty_result() {
    let outcome = run("   \n\t  ");
    assert_eq!(outcome.strategy, Some(Strategy::Enhanced));
    assert_eq!(outcome.confidence, 1.0);
    assert!(outcome.usages.is_empty());
}

#[test]
fn tier_confidence_ordering_is_strict() {
    assert!(Strategy::Enhanced.confidence() > Strategy::Basic.confidence());
    assert!(Strategy::Basic.confidence() > Strategy::Simple.confidence());
    assert_eq!(Strategy::Enhanced.name(), "enhanced");
    assert_eq!(Strategy::Basic.name(), "basic");
    assert_eq!(Strategy::Simple.name(), "simple");
}

#[test]
fn analysis_is_deterministic_across_runs() {
    let sql = "SELECT * FROM Orders o JOIN Customers c ON o.CustomerId = c.Id";
    let a = run(sql);
    let b = run(sql);
    assert_eq!(a.usages, b.usages);
    assert_eq!(a.strategy, b.strategy);
}
