//! Tiered analysis orchestration.
//!
//! Three strategies, each strictly lower-confidence than the last, run as a
//! linear chain with no backtracking: Enhanced (full structural pipeline),
//! Basic (clause-pattern matching), Simple (presence-only scan). An internal
//! failure in one tier is caught, recorded as a diagnostic, and the next tier
//! is attempted; a success — including "succeeded with no matches" — is final.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{AnalysisError, Diagnostic, DiagnosticCode};
use crate::extractor::extract_structure;
use crate::index::TableIndex;
use crate::normalizer::NormalizedSql;
use crate::resolver::{resolve_structure, scan_for_known_tables, Operation, TableUsage};

/// Analysis tier, ordered by decreasing sophistication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Enhanced,
    Basic,
    Simple,
}

impl Strategy {
    pub fn confidence(&self) -> f64 {
        match self {
            Strategy::Enhanced => 1.0,
            Strategy::Basic => 0.7,
            Strategy::Simple => 0.3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Enhanced => "enhanced",
            Strategy::Basic => "basic",
            Strategy::Simple => "simple",
        }
    }
}

/// Outcome of the strategy chain. `strategy` is `None` only when every tier
/// failed, in which case `confidence` is 0.0 and a terminal diagnostic is set.
#[derive(Debug)]
pub struct StrategyOutcome {
    pub usages: Vec<TableUsage>,
    pub strategy: Option<Strategy>,
    pub confidence: f64,
    pub diagnostics: Vec<Diagnostic>,
}

type TierFn<'a> = &'a dyn Fn() -> Result<Vec<TableUsage>, AnalysisError>;

/// Run the standard Enhanced -> Basic -> Simple chain.
pub fn analyze(norm: &NormalizedSql, index: &TableIndex) -> StrategyOutcome {
    run_chain(&[
        (Strategy::Enhanced, &|| run_enhanced(norm, index)),
        (Strategy::Basic, &|| run_basic(&norm.text, index)),
        (Strategy::Simple, &|| run_simple(&norm.text, index)),
    ])
}

fn run_chain(tiers: &[(Strategy, TierFn<'_>)]) -> StrategyOutcome {
    let mut diagnostics = Vec::new();
    for (strategy, run) in tiers {
        match run() {
            Ok(usages) => {
                debug!(
                    strategy = strategy.name(),
                    tables = usages.len(),
                    "analysis strategy succeeded"
                );
                return StrategyOutcome {
                    usages,
                    strategy: Some(*strategy),
                    confidence: strategy.confidence(),
                    diagnostics,
                };
            }
            Err(err) => {
                warn!(strategy = strategy.name(), error = %err, "analysis strategy failed");
                diagnostics.push(Diagnostic::new(
                    DiagnosticCode::StrategyFailure,
                    format!("{} strategy failed: {}", strategy.name(), err),
                ));
            }
        }
    }
    diagnostics.push(Diagnostic::new(
        DiagnosticCode::AllStrategiesFailed,
        "all analysis strategies failed",
    ));
    StrategyOutcome {
        usages: Vec::new(),
        strategy: None,
        confidence: 0.0,
        diagnostics,
    }
}

/// Enhanced tier: full structural extraction plus alias-aware resolution.
fn run_enhanced(
    norm: &NormalizedSql,
    index: &TableIndex,
) -> Result<Vec<TableUsage>, AnalysisError> {
    let structure = extract_structure(norm)?;
    resolve_structure(&structure, norm, index)
}

// Basic-tier clause patterns. The normalized text is already uppercase, so
// the patterns match plain keyword forms; the capture is the raw reference
// token, resolved through the table index afterwards.
const REF_TOKEN: &str = r"([A-Z0-9_#@$\[\]\.]+)";

static FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\bFROM\s+{REF_TOKEN}")).unwrap());
static JOIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\bJOIN\s+{REF_TOKEN}")).unwrap());
static UPDATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\bUPDATE\s+{REF_TOKEN}")).unwrap());
static INSERT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\bINSERT\s+(?:INTO\s+)?{REF_TOKEN}")).unwrap());
static DELETE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\bDELETE\s+(?:FROM\s+)?{REF_TOKEN}")).unwrap());
static MERGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\bMERGE\s+(?:INTO\s+)?{REF_TOKEN}")).unwrap());
static TRUNCATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\bTRUNCATE\s+TABLE\s+{REF_TOKEN}")).unwrap());

/// Basic tier: direct clause-pattern matching, no statement or CTE
/// decomposition. Captured tokens still resolve through the index, so alias
/// and unknown-name noise is filtered even at this tier.
fn run_basic(text: &str, index: &TableIndex) -> Result<Vec<TableUsage>, AnalysisError> {
    let patterns: [(&Regex, Operation); 7] = [
        (&FROM_RE, Operation::Select),
        (&JOIN_RE, Operation::Select),
        (&UPDATE_RE, Operation::Update),
        (&INSERT_RE, Operation::Insert),
        (&DELETE_RE, Operation::Delete),
        (&MERGE_RE, Operation::Merge),
        (&TRUNCATE_RE, Operation::Truncate),
    ];

    let mut usages: Vec<TableUsage> = Vec::new();
    for (pattern, op) in patterns {
        for caps in pattern.captures_iter(text) {
            let token = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if token.starts_with('#') || token.starts_with('@') {
                continue;
            }
            // Optional-keyword patterns can capture the keyword itself when
            // the target is absent (`DELETE FROM`, `INSERT INTO`).
            if matches!(token, "FROM" | "INTO" | "TABLE" | "TOP") {
                continue;
            }
            let Some(id) = index.find_id(token) else {
                continue;
            };
            let pos = caps.get(1).map(|m| m.start()).unwrap_or_default();
            match usages.iter_mut().find(|u| u.table_id == id) {
                Some(usage) => {
                    usage.operations.insert(op);
                    usage.score += op.weight();
                    usage.positions.push(pos);
                }
                None => usages.push(TableUsage {
                    table_id: id,
                    operations: std::iter::once(op).collect(),
                    score: op.weight(),
                    positions: vec![pos],
                }),
            }
        }
    }
    Ok(usages)
}

/// Simple tier: presence-only check. Any known table name or qualified
/// variant appearing anywhere in the normalized text is reported as a
/// REFERENCE with no operation detail.
fn run_simple(text: &str, index: &TableIndex) -> Result<Vec<TableUsage>, AnalysisError> {
    let usages = scan_for_known_tables(text, index, &HashSet::new())
        .into_iter()
        .map(|(id, pos)| TableUsage {
            table_id: id,
            operations: std::iter::once(Operation::Reference).collect(),
            score: Operation::Reference.weight(),
            positions: vec![pos],
        })
        .collect();
    Ok(usages)
}
