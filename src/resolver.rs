//! Usage resolution: attaching operation kinds to matched tables.
//!
//! Walks the extracted structure with a per-call alias map and temporary-name
//! set, so concurrent analyses never share state. Aliases recorded from
//! FROM/JOIN clauses are consulted before any bare token is treated as a new
//! table, which keeps aliases from being misreported as distinct tables.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::AnalysisError;
use crate::extractor::{
    lex, Clause, ExtractedStructure, FragmentKind, StatementKind, Tok, TokKind,
};
use crate::index::TableIndex;
use crate::normalizer::NormalizedSql;
use crate::util::{find_ci, find_word_ci};

/// Operation kinds a table can be observed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Truncate,
    Reference,
    DynamicSql,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Merge => "MERGE",
            Operation::Truncate => "TRUNCATE",
            Operation::Reference => "REFERENCE",
            Operation::DynamicSql => "DYNAMIC_SQL",
        }
    }

    /// Per-occurrence confidence weight accumulated on the owning usage.
    pub(crate) fn weight(&self) -> f64 {
        match self {
            Operation::Insert
            | Operation::Update
            | Operation::Delete
            | Operation::Merge
            | Operation::Truncate => 1.0,
            Operation::Select => 0.9,
            Operation::Reference => 0.5,
            Operation::DynamicSql => 0.3,
        }
    }
}

/// One distinct table referenced by the analyzed object.
#[derive(Debug, Clone, PartialEq)]
pub struct TableUsage {
    /// Descriptor id in the table index this usage was resolved against.
    pub table_id: usize,
    /// Union of operation kinds observed.
    pub operations: BTreeSet<Operation>,
    /// Sum of per-occurrence weights; clamped to 1.0 when flattened.
    pub score: f64,
    /// Byte offsets of matched occurrences, for diagnostics.
    pub positions: Vec<usize>,
}

#[derive(Default)]
struct UsageAccumulator {
    by_table: HashMap<usize, TableUsage>,
}

impl UsageAccumulator {
    fn record(&mut self, table_id: usize, op: Operation, pos: usize) {
        let usage = self.by_table.entry(table_id).or_insert_with(|| TableUsage {
            table_id,
            operations: BTreeSet::new(),
            score: 0.0,
            positions: Vec::new(),
        });
        usage.operations.insert(op);
        usage.score += op.weight();
        usage.positions.push(pos);
    }

    fn contains(&self, table_id: usize) -> bool {
        self.by_table.contains_key(&table_id)
    }

    fn finish(self) -> Vec<TableUsage> {
        let mut usages: Vec<TableUsage> = self
            .by_table
            .into_values()
            .filter(|u| u.score > 0.0)
            .collect();
        usages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.table_id.cmp(&b.table_id))
        });
        usages
    }
}

/// Per-analysis-call resolution state. Never shared across requests.
#[derive(Default)]
struct ResolutionScope {
    /// alias (uppercase) -> descriptor id.
    aliases: HashMap<String, usize>,
    /// Aliases bound to derived tables / subqueries; skipped entirely.
    subquery_aliases: HashSet<String>,
    /// CTE names and other temporaries (uppercase); never resolved as tables.
    temp_names: HashSet<String>,
}

impl ResolutionScope {
    fn is_temporary(&self, name: &str) -> bool {
        name.starts_with('#') || name.starts_with('@') || self.temp_names.contains(name)
    }
}

/// A syntactic table reference pulled from clause content: name parts, an
/// optional trailing alias, and its byte position.
#[derive(Debug)]
struct RawRef {
    parts: Vec<String>,
    alias: Option<String>,
    pos: usize,
    is_subquery: bool,
}

/// Words that can never be a table alias.
const ALIAS_STOP_WORDS: [&str; 25] = [
    "ON", "AS", "WITH", "WHERE", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "JOIN",
    "GROUP", "ORDER", "UNION", "SELECT", "HAVING", "PIVOT", "UNPIVOT", "USING", "FOR", "SET",
    "VALUES", "WHEN", "THEN", "OUTPUT",
];

fn is_alias_word(tok: &Tok) -> bool {
    match tok.kind {
        TokKind::BracketedWord => true,
        TokKind::Word => !ALIAS_STOP_WORDS.contains(&tok.text.as_str()),
        _ => false,
    }
}

/// Split clause content into comma-separated or join-qualified references.
fn parse_refs(toks: &[Tok], base: usize) -> Vec<RawRef> {
    let mut refs = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        match toks[i].kind {
            TokKind::Punct(',') => i += 1,
            TokKind::Punct('(') => {
                // Derived table or grouping parens; its alias is a subquery
                // alias, not a table.
                i = skip_balanced(toks, i);
                if toks.get(i).is_some_and(|t| t.is_word("AS")) {
                    i += 1;
                }
                let mut alias = None;
                if let Some(tok) = toks.get(i) {
                    if is_alias_word(tok) {
                        alias = Some(tok.text.to_uppercase());
                        i += 1;
                    }
                }
                refs.push(RawRef {
                    parts: Vec::new(),
                    alias,
                    pos: base,
                    is_subquery: true,
                });
                i = skip_to_comma(toks, i);
            }
            TokKind::Word | TokKind::BracketedWord => {
                if toks[i].kind == TokKind::Word
                    && ALIAS_STOP_WORDS.contains(&toks[i].text.as_str())
                {
                    i += 1;
                    continue;
                }
                let pos = base + toks[i].start;
                let mut parts = vec![toks[i].text.to_uppercase()];
                i += 1;
                while i + 1 < toks.len()
                    && toks[i].is_punct('.')
                    && toks[i + 1].ident().is_some()
                {
                    parts.push(toks[i + 1].text.to_uppercase());
                    i += 2;
                }
                let mut alias = None;
                if toks.get(i).is_some_and(|t| t.is_word("AS")) {
                    i += 1;
                }
                if let Some(tok) = toks.get(i) {
                    if is_alias_word(tok) {
                        alias = Some(tok.text.to_uppercase());
                        i += 1;
                    }
                }
                refs.push(RawRef {
                    parts,
                    alias,
                    pos,
                    is_subquery: false,
                });
                i = skip_to_comma(toks, i);
            }
            _ => i += 1,
        }
    }
    refs
}

fn skip_balanced(toks: &[Tok], i: usize) -> usize {
    let mut depth = 0;
    let mut j = i;
    while j < toks.len() {
        match toks[j].kind {
            TokKind::Punct('(') => depth += 1,
            TokKind::Punct(')') => {
                depth -= 1;
                if depth == 0 {
                    return j + 1;
                }
            }
            _ => {}
        }
        j += 1;
    }
    toks.len()
}

/// Advance past table hints and anything else up to the next top-level comma.
fn skip_to_comma(toks: &[Tok], mut i: usize) -> usize {
    let mut depth = 0;
    while i < toks.len() {
        match toks[i].kind {
            TokKind::Punct('(') => depth += 1,
            TokKind::Punct(')') => depth = (depth - 1).max(0),
            TokKind::Punct(',') if depth == 0 => return i,
            _ => {}
        }
        i += 1;
    }
    i
}

/// Resolve name parts to a descriptor id, consulting the alias map first for
/// single-part tokens and suppressing temporaries.
fn resolve_parts(parts: &[String], scope: &ResolutionScope, index: &TableIndex) -> Option<usize> {
    match parts {
        [single] => {
            if scope.is_temporary(single) || scope.subquery_aliases.contains(single) {
                return None;
            }
            if let Some(&id) = scope.aliases.get(single) {
                return Some(id);
            }
            index.find_id(single)
        }
        [schema, name] => index.find_parts(schema, name),
        // database.schema.name — resolve by the trailing two parts.
        [.., schema, name] => index.find_parts(schema, name),
        [] => None,
    }
}

/// Resolution without the alias map, used while the map is still being built.
fn resolve_parts_direct(
    parts: &[String],
    scope: &ResolutionScope,
    index: &TableIndex,
) -> Option<usize> {
    match parts {
        [single] => {
            if scope.is_temporary(single) {
                return None;
            }
            index.find_id(single)
        }
        _ => resolve_parts(parts, scope, index),
    }
}

/// Parsed statement head: the write target and its optional alias.
struct HeadTarget {
    parts: Vec<String>,
    alias: Option<String>,
    pos: usize,
}

/// Parse the leading clause of a write statement (`INSERT [INTO] t`,
/// `UPDATE t`, `DELETE [FROM] t`, `MERGE [INTO] t [AS a]`, `TRUNCATE TABLE t`).
fn parse_head_target(toks: &[Tok], base: usize) -> Option<HeadTarget> {
    let mut i = 1; // past the statement keyword
    // Optional TOP (n).
    if toks.get(i).is_some_and(|t| t.is_word("TOP")) {
        i += 1;
        if toks.get(i).is_some_and(|t| t.is_punct('(')) {
            i = skip_balanced(toks, i);
        } else {
            i += 1; // bare TOP n
        }
    }
    if toks
        .get(i)
        .is_some_and(|t| t.is_word("INTO") || t.is_word("FROM") || t.is_word("TABLE"))
    {
        i += 1;
    }
    let first = toks.get(i)?;
    first.ident()?;
    let pos = base + first.start;
    let mut parts = vec![first.text.to_uppercase()];
    i += 1;
    while i + 1 < toks.len() && toks[i].is_punct('.') && toks[i + 1].ident().is_some() {
        parts.push(toks[i + 1].text.to_uppercase());
        i += 2;
    }
    let mut alias = None;
    if toks.get(i).is_some_and(|t| t.is_word("AS")) {
        i += 1;
    }
    if let Some(tok) = toks.get(i) {
        if is_alias_word(tok) {
            alias = Some(tok.text.to_uppercase());
        }
    }
    Some(HeadTarget { parts, alias, pos })
}

/// Find the reference following a depth-0 `USING` keyword (MERGE source).
fn parse_merge_using(toks: &[Tok], base: usize) -> Option<HeadTarget> {
    let mut depth = 0;
    for (i, tok) in toks.iter().enumerate() {
        match tok.kind {
            TokKind::Punct('(') => depth += 1,
            TokKind::Punct(')') => depth -= 1,
            TokKind::Word if depth == 0 && tok.text == "USING" => {
                let rest = &toks[i..];
                return parse_head_target(rest, base);
            }
            _ => {}
        }
    }
    None
}

/// Scan free text for any known table variant appearing as a whole word.
/// Single-part variant keys found in `skip_names` (aliases, CTE names) are
/// ignored so temporaries never surface through this path.
pub(crate) fn scan_for_known_tables(
    text: &str,
    index: &TableIndex,
    skip_names: &HashSet<String>,
) -> Vec<(usize, usize)> {
    let mut earliest: HashMap<usize, usize> = HashMap::new();
    for (key, id) in index.variant_keys() {
        if !key.contains('.') && skip_names.contains(key) {
            continue;
        }
        let hit = if key.contains('[') {
            // Bracketed variants are already delimited; plain find suffices.
            find_ci(text, key)
        } else {
            find_word_ci(text, key, 0)
        };
        if let Some(pos) = hit {
            earliest
                .entry(id)
                .and_modify(|p| *p = (*p).min(pos))
                .or_insert(pos);
        }
    }
    let mut found: Vec<(usize, usize)> = earliest.into_iter().collect();
    found.sort_by_key(|&(_, pos)| pos);
    found
}

/// Resolve the extracted structure into per-table usage records.
pub fn resolve_structure(
    structure: &ExtractedStructure,
    norm: &NormalizedSql,
    index: &TableIndex,
) -> Result<Vec<TableUsage>, AnalysisError> {
    let mut scope = ResolutionScope {
        temp_names: structure.temp_names.clone(),
        ..ResolutionScope::default()
    };

    // Lex clause contents once; both passes reuse the token lists.
    let mut clause_toks: Vec<(usize, Clause, Vec<Tok>, usize)> = Vec::new();
    for (frag_idx, frag) in structure.fragments.iter().enumerate() {
        for clause in [Clause::From, Clause::Join] {
            for ct in frag.clauses.get(&clause).into_iter().flatten() {
                let toks = lex(&ct.text)?;
                clause_toks.push((frag_idx, clause, toks, ct.offset));
            }
        }
    }

    // Pass 1: accumulate alias -> table bindings before any usage is recorded,
    // so aliases seen ahead of their definition still resolve.
    for (_, _, toks, offset) in &clause_toks {
        for r in parse_refs(toks, *offset) {
            if r.is_subquery {
                if let Some(alias) = r.alias {
                    scope.subquery_aliases.insert(alias);
                }
            } else if let Some(alias) = r.alias {
                if let Some(id) = resolve_parts_direct(&r.parts, &scope, index) {
                    scope.aliases.entry(alias).or_insert(id);
                }
            }
        }
    }

    let mut acc = UsageAccumulator::default();
    let mut delete_targets: HashMap<usize, usize> = HashMap::new();

    // Pass 2a: statement write targets.
    for (frag_idx, frag) in structure.fragments.iter().enumerate() {
        if frag.kind != FragmentKind::Statement {
            continue;
        }
        let toks = lex(&frag.content)?;
        let head_op = match frag.statement_kind {
            StatementKind::Insert => Some(Operation::Insert),
            StatementKind::Update => Some(Operation::Update),
            StatementKind::Delete => Some(Operation::Delete),
            StatementKind::Merge => Some(Operation::Merge),
            _ if toks.first().is_some_and(|t| t.is_word("TRUNCATE")) => {
                Some(Operation::Truncate)
            }
            _ => None,
        };
        if let Some(op) = head_op {
            if let Some(target) = parse_head_target(&toks, frag.offset) {
                if let Some(alias) = &target.alias {
                    if let Some(id) = resolve_parts_direct(&target.parts, &scope, index) {
                        scope.aliases.entry(alias.clone()).or_insert(id);
                    }
                }
                if let Some(id) = resolve_parts(&target.parts, &scope, index) {
                    acc.record(id, op, target.pos);
                    if op == Operation::Delete {
                        delete_targets.insert(frag_idx, id);
                    }
                }
            }
            if frag.statement_kind == StatementKind::Merge {
                if let Some(source) = parse_merge_using(&toks, frag.offset) {
                    if let Some(id) = resolve_parts(&source.parts, &scope, index) {
                        acc.record(id, Operation::Select, source.pos);
                    }
                }
            }
        }
    }

    // Pass 2b: read references from FROM/JOIN clause content.
    for (frag_idx, _, toks, offset) in &clause_toks {
        for r in parse_refs(toks, *offset) {
            if r.is_subquery {
                continue;
            }
            let Some(id) = resolve_parts(&r.parts, &scope, index) else {
                continue;
            };
            // `DELETE FROM t` names its own target in the FROM clause; that
            // occurrence is the delete, not a read.
            if delete_targets.get(frag_idx) == Some(&id) {
                continue;
            }
            acc.record(id, Operation::Select, r.pos);
        }
    }

    // Pass 2c: dynamic-SQL fragments — static table names recovered from
    // literal text, tagged DYNAMIC_SQL only.
    let skip_names: HashSet<String> = scope
        .aliases
        .keys()
        .chain(scope.subquery_aliases.iter())
        .chain(scope.temp_names.iter())
        .cloned()
        .collect();
    for site in &structure.dynamic_sql {
        for (id, pos) in scan_for_known_tables(&site.content, index, &skip_names) {
            acc.record(id, Operation::DynamicSql, site.offset + pos);
        }
    }

    // Pass 2d: residual references — known tables appearing anywhere in the
    // normalized text with no operation keyword nearby.
    for (id, pos) in scan_for_known_tables(&norm.text, index, &skip_names) {
        if !acc.contains(id) {
            acc.record(id, Operation::Reference, pos);
        }
    }

    Ok(acc.finish())
}
