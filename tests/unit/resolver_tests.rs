use pretty_assertions::assert_eq;
use sql_depscan::extractor::extract_structure;
use sql_depscan::index::TableIndex;
use sql_depscan::normalizer::{normalize, DEFAULT_MAX_DEFINITION_BYTES};
use sql_depscan::provider::TableInfo;
use sql_depscan::resolver::{resolve_structure, Operation, TableUsage};

fn index() -> TableIndex {
    TableIndex::build(
        &[
            TableInfo::new("Orders"),
            TableInfo::new("Customers"),
            TableInfo::with_schema("Events", "audit"),
        ],
        "dbo",
        &[],
    )
}

fn resolve(sql: &str) -> Vec<TableUsage> {
    let norm = normalize(sql, DEFAULT_MAX_DEFINITION_BYTES);
    let structure = extract_structure(&norm).unwrap();
    resolve_structure(&structure, &norm, &index()).unwrap()
}

fn usage_for<'a>(usages: &'a [TableUsage], idx: &TableIndex, name: &str) -> &'a TableUsage {
    let id = idx.find_id(name).unwrap();
    usages
        .iter()
        .find(|u| u.table_id == id)
        .unwrap_or_else(|| panic!("no usage for {name}"))
}

#[test]
fn alias_defined_later_still_resolves() {
    // o.CustomerId appears in the ON clause before FROM is even parsed;
    // the two-pass design makes ordering irrelevant.
    let usages = resolve(
        "SELECT * FROM Customers c LEFT JOIN Orders o ON c.Id = o.CustomerId \
         WHERE o.Total > 0",
    );
    assert_eq!(usages.len(), 2);
}

#[test]
fn alias_form_delete_resolves_through_alias_map() {
    let idx = index();
    let usages = resolve("DELETE o FROM Orders o WHERE o.Total = 0");
    let orders = usage_for(&usages, &idx, "Orders");
    assert!(orders.operations.contains(&Operation::Delete));
    assert!(!orders.operations.contains(&Operation::Select));
}

#[test]
fn derived_table_alias_is_never_a_table() {
    let usages = resolve("SELECT * FROM (SELECT Id FROM Orders) AS Customers");
    // "Customers" here is a subquery alias shadowing the real table.
    let idx = index();
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].table_id, idx.find_id("Orders").unwrap());
}

#[test]
fn three_part_names_resolve_by_trailing_parts() {
    let idx = index();
    let usages = resolve("SELECT * FROM MyDb.audit.Events");
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].table_id, idx.find_id("audit.Events").unwrap());
}

#[test]
fn merge_records_target_and_source_separately() {
    let idx = index();
    let usages = resolve(
        "MERGE Orders AS t USING Customers AS s ON t.CustomerId = s.Id \
         WHEN MATCHED THEN UPDATE SET t.Name = s.Name;",
    );
    let target = usage_for(&usages, &idx, "Orders");
    assert!(target.operations.contains(&Operation::Merge));
    let source = usage_for(&usages, &idx, "Customers");
    assert!(source.operations.contains(&Operation::Select));
    assert!(!source.operations.contains(&Operation::Merge));
}

#[test]
fn bare_mention_outside_any_clause_is_a_reference() {
    let idx = index();
    let usages = resolve("CREATE TRIGGER trg ON Orders AFTER INSERT AS SELECT 1");
    let orders = usage_for(&usages, &idx, "Orders");
    assert_eq!(
        orders.operations.iter().collect::<Vec<_>>(),
        vec![&Operation::Reference]
    );
}

#[test]
fn dynamic_sql_mentioning_a_cte_name_stays_suppressed() {
    let usages = resolve(
        "WITH Recent AS (SELECT * FROM Orders) SELECT * FROM Recent; \
         EXEC('SELECT * FROM Recent')",
    );
    let idx = index();
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].table_id, idx.find_id("Orders").unwrap());
}

#[test]
fn dynamic_sql_hit_carries_only_the_dynamic_operation() {
    let idx = index();
    let usages = resolve("EXEC('DELETE FROM Customers')");
    let customers = usage_for(&usages, &idx, "Customers");
    assert_eq!(
        customers.operations.iter().collect::<Vec<_>>(),
        vec![&Operation::DynamicSql]
    );
}

#[test]
fn multibyte_identifier_before_a_table_keeps_it_selected() {
    let idx = index();
    let usages = resolve("SELECT * FROM [Tablé], Orders WHERE 1 = 1");
    let orders = usage_for(&usages, &idx, "Orders");
    assert!(orders.operations.contains(&Operation::Select));
    assert!(!orders.operations.contains(&Operation::Reference));
}

#[test]
fn write_heavy_tables_sort_first() {
    let usages = resolve(
        "INSERT INTO Orders (Id) SELECT Id FROM Customers; \
         UPDATE Orders SET Total = 0",
    );
    let idx = index();
    assert_eq!(usages[0].table_id, idx.find_id("Orders").unwrap());
    assert!(usages[0].score > usages[1].score);
}

#[test]
fn repeated_reads_accumulate_score_and_positions() {
    let idx = index();
    let usages = resolve("SELECT * FROM Orders; SELECT * FROM Orders o JOIN Customers c ON 1=1");
    let orders = usage_for(&usages, &idx, "Orders");
    assert_eq!(orders.positions.len(), 2);
    assert!(orders.score > 0.9);
}
