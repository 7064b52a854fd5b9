//! Externally visible analysis results.
//!
//! [`TableUsageRecord`] is the flattened form handed to downstream consumers
//! (dependency graphs, impact analysis, documentation tooling); field names
//! follow the snake_case wire shape those tools expect.

use serde::Serialize;

use crate::error::Diagnostic;
use crate::index::TableIndex;
use crate::resolver::{Operation, TableUsage};

/// One table dependency in flattened record form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableUsageRecord {
    pub referenced_object: String,
    pub referenced_object_type: String,
    pub operations: Vec<String>,
    pub is_selected: bool,
    pub is_updated: bool,
    pub is_insert_all: bool,
    pub is_delete: bool,
    pub confidence: f64,
}

/// How the result was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisMetadata {
    pub strategy: String,
    pub confidence: f64,
    pub diagnostics: Vec<Diagnostic>,
}

/// Outcome of one dependency analysis.
///
/// `referenced_by` is always empty from this engine; hosts compute the
/// reverse mapping by analyzing the full object set and inverting the
/// table-to-object relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub depends_on: Vec<TableUsageRecord>,
    pub referenced_by: Vec<TableUsageRecord>,
    pub metadata: AnalysisMetadata,
}

impl AnalysisResult {
    /// An empty result carrying only metadata. Used for valid terminal states
    /// (no definition text) and recoverable failures alike.
    pub(crate) fn empty(strategy: &str, confidence: f64, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            depends_on: Vec::new(),
            referenced_by: Vec::new(),
            metadata: AnalysisMetadata {
                strategy: strategy.to_string(),
                confidence,
                diagnostics,
            },
        }
    }

    /// Flatten resolved usages into confidence-ordered records.
    pub(crate) fn from_usages(
        usages: Vec<TableUsage>,
        index: &TableIndex,
        strategy: &str,
        confidence: f64,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        let mut depends_on: Vec<TableUsageRecord> = usages
            .into_iter()
            .map(|usage| flatten_usage(usage, index, confidence))
            .collect();
        // Confidence-descending, name ascending for stable output.
        depends_on.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.referenced_object.cmp(&b.referenced_object))
        });
        Self {
            depends_on,
            referenced_by: Vec::new(),
            metadata: AnalysisMetadata {
                strategy: strategy.to_string(),
                confidence,
                diagnostics,
            },
        }
    }
}

fn flatten_usage(usage: TableUsage, index: &TableIndex, strategy_confidence: f64) -> TableUsageRecord {
    let ops = &usage.operations;
    TableUsageRecord {
        referenced_object: index.descriptor(usage.table_id).fully_qualified.clone(),
        referenced_object_type: "Table".to_string(),
        operations: ops.iter().map(|op| op.as_str().to_string()).collect(),
        // Dynamic-SQL sightings carry no reliable operation, so they never
        // set the boolean roll-ups.
        is_selected: ops.contains(&Operation::Select),
        is_updated: ops.contains(&Operation::Update) || ops.contains(&Operation::Merge),
        is_insert_all: ops.contains(&Operation::Insert) || ops.contains(&Operation::Merge),
        is_delete: ops.contains(&Operation::Delete) || ops.contains(&Operation::Truncate),
        confidence: usage.score.min(1.0) * strategy_confidence,
    }
}
