//! Structural extraction over normalized definition text.
//!
//! Splits the clean token stream into statements, clauses,
//! common-table-expressions, subqueries, and dynamic-SQL fragments. All
//! scanning is tokenizer-based (sqlparser with the MS SQL dialect); the
//! pattern-based shortcuts live in the deliberately lower-confidence Basic
//! analysis tier, not here.
//!
//! Key components:
//! - `lex`: tokenize normalized text into position-tagged tokens
//! - `split_statements`: statement boundaries at top-level terminators
//! - `extract_clauses`: FROM/JOIN/SET/VALUES/GROUP BY/ORDER BY clause map
//! - `extract_structure`: the full pass producing [`ExtractedStructure`]

use std::collections::{HashMap, HashSet};

use sqlparser::dialect::MsSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::AnalysisError;
use crate::normalizer::NormalizedSql;

/// Statement classification by leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    With,
    Exec,
    Declare,
    If,
    Unknown,
}

/// What kind of slice a fragment was carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Statement,
    Cte,
    Subquery,
    DynamicSql,
}

/// Named clauses recognized within a single statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clause {
    From,
    Join,
    Set,
    Values,
    GroupBy,
    OrderBy,
}

/// Raw clause content with its byte offset in the normalized text.
#[derive(Debug, Clone)]
pub struct ClauseText {
    pub text: String,
    pub offset: usize,
}

/// A parsed slice of the statement tree.
#[derive(Debug, Clone)]
pub struct StructuralFragment {
    pub kind: FragmentKind,
    pub statement_kind: StatementKind,
    pub content: String,
    pub offset: usize,
    pub clauses: HashMap<Clause, Vec<ClauseText>>,
}

/// Literal text recovered from a dynamic-SQL call site.
///
/// Inherently incomplete when the executed string is built from runtime
/// concatenation; the resolver tags anything found here `DYNAMIC_SQL` and
/// never claims operation detail for it.
#[derive(Debug, Clone)]
pub struct DynamicSqlSite {
    pub content: String,
    pub offset: usize,
}

/// Output of [`extract_structure`].
#[derive(Debug, Clone, Default)]
pub struct ExtractedStructure {
    pub fragments: Vec<StructuralFragment>,
    /// CTE names registered as temporary tables (uppercase); these must be
    /// excluded from final table usage.
    pub temp_names: HashSet<String>,
    pub dynamic_sql: Vec<DynamicSqlSite>,
}

// =============================================================================
// Lexing
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokKind {
    /// Unquoted identifier or keyword.
    Word,
    /// `[bracketed]` or `"quoted"` identifier; `text` holds the inner value.
    BracketedWord,
    Punct(char),
    Literal,
    Other,
}

/// A significant token with byte offsets into the lexed text.
#[derive(Debug, Clone)]
pub(crate) struct Tok {
    pub kind: TokKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Tok {
    pub fn is_word(&self, upper: &str) -> bool {
        self.kind == TokKind::Word && self.text == upper
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokKind::Punct(c)
    }

    /// Identifier text regardless of bracketing.
    pub fn ident(&self) -> Option<&str> {
        match self.kind {
            TokKind::Word | TokKind::BracketedWord => Some(&self.text),
            _ => None,
        }
    }
}

/// Byte offsets of each line start, for converting tokenizer locations.
fn compute_line_offsets(sql: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (i, ch) in sql.char_indices() {
        if ch == '\n' {
            offsets.push(i + 1);
        }
    }
    offsets
}

/// Convert a (1-based line, 1-based column) location to a byte offset.
/// Tokenizer columns count characters, so the line is walked by char to stay
/// aligned on multi-byte identifiers.
fn location_to_byte_offset(text: &str, line_offsets: &[usize], line: u64, column: u64) -> usize {
    if line == 0 || line as usize > line_offsets.len() {
        return 0;
    }
    let line_start = line_offsets[(line - 1) as usize];
    let chars = column.saturating_sub(1) as usize;
    match text[line_start..].char_indices().nth(chars) {
        Some((i, _)) => line_start + i,
        None => text.len(),
    }
}

/// Tokenize normalized text into significant tokens (whitespace dropped).
pub(crate) fn lex(text: &str) -> Result<Vec<Tok>, AnalysisError> {
    let dialect = MsSqlDialect {};
    let tokens = Tokenizer::new(&dialect, text)
        .tokenize_with_location()
        .map_err(|e| AnalysisError::Tokenize {
            message: e.to_string(),
        })?;

    let line_offsets = compute_line_offsets(text);
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        let start =
            location_to_byte_offset(text, &line_offsets, token.span.start.line, token.span.start.column);
        let end =
            location_to_byte_offset(text, &line_offsets, token.span.end.line, token.span.end.column);
        let (kind, text) = match &token.token {
            Token::Whitespace(_) => continue,
            Token::Word(w) => {
                if w.quote_style.is_some() {
                    (TokKind::BracketedWord, w.value.clone())
                } else {
                    (TokKind::Word, w.value.clone())
                }
            }
            Token::Period => (TokKind::Punct('.'), ".".to_string()),
            Token::Comma => (TokKind::Punct(','), ",".to_string()),
            Token::LParen => (TokKind::Punct('('), "(".to_string()),
            Token::RParen => (TokKind::Punct(')'), ")".to_string()),
            Token::SemiColon => (TokKind::Punct(';'), ";".to_string()),
            Token::SingleQuotedString(s) | Token::NationalStringLiteral(s) => {
                (TokKind::Literal, s.clone())
            }
            other => (TokKind::Other, other.to_string()),
        };
        out.push(Tok {
            kind,
            text,
            start,
            end,
        });
    }
    Ok(out)
}

// =============================================================================
// Statement splitting
// =============================================================================

/// Keywords that end the current statement and are consumed.
const BOUNDARY_WORDS: [&str; 4] = ["GO", "BEGIN", "END", "ELSE"];

/// Keywords that start a new statement when seen at paren depth 0. T-SQL
/// bodies rarely carry `;`, so these secondary splits keep per-statement
/// target detection working. `SELECT` is deliberately absent: it legitimately
/// follows `INSERT ... SELECT` at depth 0.
const SPLIT_BEFORE: [&str; 10] = [
    "INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE", "DECLARE", "IF", "EXEC", "EXECUTE", "WITH",
];

/// Words that suppress a secondary split when they directly precede the
/// keyword (cursor `FOR UPDATE`, trigger `INSTEAD OF UPDATE` / `AFTER INSERT`,
/// MERGE `WHEN MATCHED THEN UPDATE`).
const SPLIT_GUARD_WORDS: [&str; 5] = ["FOR", "OF", "AFTER", "BEFORE", "THEN"];

fn split_statements(toks: &[Tok]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;
    let mut i = 0;

    while i < toks.len() {
        let tok = &toks[i];
        match tok.kind {
            TokKind::Punct('(') => depth += 1,
            TokKind::Punct(')') => depth = (depth - 1).max(0),
            TokKind::Punct(';') if depth == 0 => {
                if i > start {
                    ranges.push((start, i));
                }
                start = i + 1;
            }
            TokKind::Word if depth == 0 => {
                let word = tok.text.as_str();
                if BOUNDARY_WORDS.contains(&word) {
                    if i > start {
                        ranges.push((start, i));
                    }
                    start = i + 1;
                } else if i > start && SPLIT_BEFORE.contains(&word) && splittable_at(toks, i) {
                    ranges.push((start, i));
                    start = i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    if toks.len() > start {
        ranges.push((start, toks.len()));
    }
    ranges
}

fn splittable_at(toks: &[Tok], i: usize) -> bool {
    let word = toks[i].text.as_str();
    if let Some(prev) = toks.get(i.wrapping_sub(1)) {
        if prev.is_punct(',') {
            return false;
        }
        if let TokKind::Word = prev.kind {
            if SPLIT_GUARD_WORDS.contains(&prev.text.as_str()) {
                return false;
            }
            // `WITH` is statement-initial only after `AS` (view/procedure
            // bodies); everywhere else at depth 0 it introduces table hints.
            if word == "WITH" {
                return prev.text == "AS";
            }
        } else if word == "WITH" {
            return false;
        }
    }
    true
}

fn classify(toks: &[Tok]) -> StatementKind {
    let Some(first) = toks.first() else {
        return StatementKind::Unknown;
    };
    if first.kind != TokKind::Word {
        return StatementKind::Unknown;
    }
    match first.text.as_str() {
        "SELECT" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "MERGE" => StatementKind::Merge,
        "WITH" => StatementKind::With,
        "EXEC" | "EXECUTE" => StatementKind::Exec,
        "DECLARE" => StatementKind::Declare,
        "IF" => StatementKind::If,
        _ => StatementKind::Unknown,
    }
}

// =============================================================================
// Clause extraction
// =============================================================================

/// Depth-0 words that terminate the clause currently being captured.
const CLAUSE_TERMINATORS: [&str; 22] = [
    "FROM",
    "JOIN",
    "INNER",
    "LEFT",
    "RIGHT",
    "FULL",
    "CROSS",
    "OUTER",
    "WHERE",
    "GROUP",
    "ORDER",
    "HAVING",
    "UNION",
    "EXCEPT",
    "INTERSECT",
    "SET",
    "VALUES",
    "ON",
    "WHEN",
    "OUTPUT",
    "OPTION",
    "SELECT",
];

fn extract_clauses(toks: &[Tok], text: &str) -> HashMap<Clause, Vec<ClauseText>> {
    let mut clauses: HashMap<Clause, Vec<ClauseText>> = HashMap::new();
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < toks.len() {
        match toks[i].kind {
            TokKind::Punct('(') => {
                depth += 1;
                i += 1;
            }
            TokKind::Punct(')') => {
                depth = (depth - 1).max(0);
                i += 1;
            }
            TokKind::Word if depth == 0 => {
                let (clause, skip) = match toks[i].text.as_str() {
                    "FROM" => (Some(Clause::From), 1),
                    "JOIN" => (Some(Clause::Join), 1),
                    "SET" => (Some(Clause::Set), 1),
                    "VALUES" => (Some(Clause::Values), 1),
                    "GROUP" if next_is_word(toks, i + 1, "BY") => (Some(Clause::GroupBy), 2),
                    "ORDER" if next_is_word(toks, i + 1, "BY") => (Some(Clause::OrderBy), 2),
                    _ => (None, 1),
                };
                let Some(clause) = clause else {
                    i += 1;
                    continue;
                };
                let content_start = i + skip;
                let mut j = content_start;
                let mut inner_depth: i32 = 0;
                while j < toks.len() {
                    match toks[j].kind {
                        TokKind::Punct('(') => inner_depth += 1,
                        TokKind::Punct(')') => inner_depth = (inner_depth - 1).max(0),
                        TokKind::Punct(';') if inner_depth == 0 => break,
                        TokKind::Word
                            if inner_depth == 0
                                && CLAUSE_TERMINATORS.contains(&toks[j].text.as_str()) =>
                        {
                            break
                        }
                        _ => {}
                    }
                    j += 1;
                }
                if j > content_start {
                    let span_start = toks[content_start].start;
                    let span_end = toks[j - 1].end;
                    clauses.entry(clause).or_default().push(ClauseText {
                        text: text[span_start..span_end].to_string(),
                        offset: span_start,
                    });
                }
                i = j;
            }
            _ => i += 1,
        }
    }
    clauses
}

fn next_is_word(toks: &[Tok], i: usize, upper: &str) -> bool {
    toks.get(i).is_some_and(|t| t.is_word(upper))
}

/// Index just past the matching close paren, given `i` at an open paren.
fn balanced_end(toks: &[Tok], i: usize) -> usize {
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

// =============================================================================
// Full structural pass
// =============================================================================

/// Extract statements, CTEs, subqueries, and dynamic-SQL fragments from
/// normalized definition text.
pub fn extract_structure(norm: &NormalizedSql) -> Result<ExtractedStructure, AnalysisError> {
    let toks = lex(&norm.text)?;
    let text = norm.text.as_str();

    let mut structure = ExtractedStructure::default();

    for (a, b) in split_statements(&toks) {
        let slice = &toks[a..b];
        if slice.is_empty() {
            continue;
        }
        if slice[0].is_word("WITH") {
            let rest = extract_ctes(slice, text, &mut structure);
            if rest < slice.len() {
                push_statement(&slice[rest..], text, &mut structure);
            }
        } else {
            push_statement(slice, text, &mut structure);
        }
    }

    extract_subqueries(&toks, text, &mut structure);
    structure.dynamic_sql = extract_dynamic_sql(&toks, norm);

    Ok(structure)
}

fn push_statement(slice: &[Tok], text: &str, structure: &mut ExtractedStructure) {
    let span_start = slice[0].start;
    let span_end = slice[slice.len() - 1].end;
    structure.fragments.push(StructuralFragment {
        kind: FragmentKind::Statement,
        statement_kind: classify(slice),
        content: text[span_start..span_end].to_string(),
        offset: span_start,
        clauses: extract_clauses(slice, text),
    });
}

/// Parse `WITH name [(cols)] AS ( body ) [, ...]` at the head of a statement.
/// Registers each CTE name as a temporary table, emits a `Cte` fragment per
/// body, and returns the token index where the main statement begins.
fn extract_ctes(slice: &[Tok], text: &str, structure: &mut ExtractedStructure) -> usize {
    let mut i = 1; // past WITH
    loop {
        let Some(name) = slice.get(i).and_then(Tok::ident) else {
            break;
        };
        let name = name.to_string();
        i += 1;

        // Optional column list.
        if slice.get(i).is_some_and(|t| t.is_punct('(')) {
            i = balanced_end(slice, i);
        }
        if !slice.get(i).is_some_and(|t| t.is_word("AS")) {
            break;
        }
        i += 1;
        if !slice.get(i).is_some_and(|t| t.is_punct('(')) {
            break;
        }
        let body_end = balanced_end(slice, i); // just past ')'
        let body = &slice[i + 1..body_end.saturating_sub(1)];
        structure.temp_names.insert(name.to_uppercase());
        if !body.is_empty() {
            let span_start = body[0].start;
            let span_end = body[body.len() - 1].end;
            structure.fragments.push(StructuralFragment {
                kind: FragmentKind::Cte,
                statement_kind: classify(body),
                content: text[span_start..span_end].to_string(),
                offset: span_start,
                clauses: extract_clauses(body, text),
            });
        }
        i = body_end;

        if slice.get(i).is_some_and(|t| t.is_punct(',')) {
            i += 1;
            continue;
        }
        break;
    }
    i
}

/// Balanced-parenthesis scan with lookahead: an opening paren directly
/// followed by `SELECT` or `WITH` marks a subquery rather than ordinary
/// grouping parentheses.
fn extract_subqueries(toks: &[Tok], text: &str, structure: &mut ExtractedStructure) {
    for i in 0..toks.len() {
        if !toks[i].is_punct('(') {
            continue;
        }
        let Some(next) = toks.get(i + 1) else {
            continue;
        };
        if !(next.is_word("SELECT") || next.is_word("WITH")) {
            continue;
        }
        let end = balanced_end(toks, i);
        let body = &toks[i + 1..end.saturating_sub(1)];
        if body.is_empty() {
            continue;
        }
        let span_start = body[0].start;
        let span_end = body[body.len() - 1].end;
        structure.fragments.push(StructuralFragment {
            kind: FragmentKind::Subquery,
            statement_kind: classify(body),
            content: text[span_start..span_end].to_string(),
            offset: span_start,
            clauses: extract_clauses(body, text),
        });
    }
}

/// Find `EXEC(...)` / `EXECUTE(...)` argument spans and the literal argument
/// of `sp_executesql`, recovering the raw string payloads the normalizer
/// retained. Arguments built purely from variables yield nothing.
fn extract_dynamic_sql(toks: &[Tok], norm: &NormalizedSql) -> Vec<DynamicSqlSite> {
    let mut sites = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        let tok = &toks[i];
        if tok.is_word("EXEC") || tok.is_word("EXECUTE") {
            if toks.get(i + 1).is_some_and(|t| t.is_punct('(')) {
                let end = balanced_end(toks, i + 1);
                let span_start = toks[i + 1].start;
                let span_end = toks[end.saturating_sub(1).min(toks.len() - 1)].end;
                let recovered: Vec<&str> = norm
                    .literals
                    .iter()
                    .filter(|lit| lit.start >= span_start && lit.end <= span_end)
                    .map(|lit| lit.value.as_str())
                    .collect();
                if !recovered.is_empty() {
                    sites.push(DynamicSqlSite {
                        content: recovered.join(" ").to_ascii_uppercase(),
                        offset: span_start,
                    });
                }
                i = end;
                continue;
            }
        } else if tok.kind == TokKind::Word && tok.text == "SP_EXECUTESQL" {
            // First literal argument, matched by span against the token.
            if let Some(lit_tok) = toks[i + 1..]
                .iter()
                .take(4)
                .find(|t| t.kind == TokKind::Literal)
            {
                if let Some(lit) = norm
                    .literals
                    .iter()
                    .find(|l| l.start >= lit_tok.start && l.end <= lit_tok.end)
                {
                    if !lit.value.trim().is_empty() {
                        sites.push(DynamicSqlSite {
                            content: lit.value.to_ascii_uppercase(),
                            offset: lit.start,
                        });
                    }
                }
            }
        }
        i += 1;
    }
    sites
}
