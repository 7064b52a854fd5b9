//! Lexical normalization of raw object definitions.
//!
//! Produces a clean, uppercase token stream for the downstream extractors:
//! comments are blanked to whitespace, string-literal payloads are masked (the
//! delimiters stay), and everything else is ASCII-uppercased. Masking is
//! length-preserving byte-for-byte, so every offset into the normalized text
//! is also a valid offset into the raw text — the dynamic-SQL extractor relies
//! on this to recover literal payloads by span.
//!
//! Normalization never fails. Unterminated comments and quotes simply run to
//! the end of the input, and a pathological internal failure falls back to a
//! plain uppercase copy with a diagnostic attached.

use crate::error::{Diagnostic, DiagnosticCode};

/// Default cap on definition size before normalization (1 MiB).
pub const DEFAULT_MAX_DEFINITION_BYTES: usize = 1024 * 1024;

/// A string literal captured during normalization.
///
/// `start`/`end` delimit the payload (between the quotes) in both the raw and
/// the normalized text; `value` is the raw payload with escapes left as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub start: usize,
    pub end: usize,
    pub value: String,
}

/// Output of [`normalize`].
#[derive(Debug, Clone)]
pub struct NormalizedSql {
    /// Uppercase text with comments blanked and literal payloads masked.
    pub text: String,
    /// String literals in order of appearance, payloads preserved.
    pub literals: Vec<StringLiteral>,
    /// Whether the input was cut at the size guard.
    pub truncated: bool,
    /// Recoverable events observed while normalizing.
    pub diagnostics: Vec<Diagnostic>,
}

/// Normalize raw definition text for analysis.
///
/// `max_bytes` bounds worst-case cost on pathologically large definitions;
/// the cut lands on a char boundary and is recorded as a diagnostic.
pub fn normalize(raw: &str, max_bytes: usize) -> NormalizedSql {
    let mut diagnostics = Vec::new();

    let (input, truncated) = truncate_at_char_boundary(raw, max_bytes);
    if truncated {
        diagnostics.push(Diagnostic::new(
            DiagnosticCode::InputTruncated,
            format!(
                "definition truncated from {} to {} bytes before analysis",
                raw.len(),
                input.len()
            ),
        ));
    }

    match mask_and_fold(input) {
        Some((text, literals)) => NormalizedSql {
            text,
            literals,
            truncated,
            diagnostics,
        },
        None => {
            diagnostics.push(Diagnostic::new(
                DiagnosticCode::NormalizerFallback,
                "lexical scan failed; using plain uppercase text",
            ));
            NormalizedSql {
                text: input.to_ascii_uppercase(),
                literals: Vec::new(),
                truncated,
                diagnostics,
            }
        }
    }
}

fn truncate_at_char_boundary(raw: &str, max_bytes: usize) -> (&str, bool) {
    if raw.len() <= max_bytes {
        return (raw, false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !raw.is_char_boundary(cut) {
        cut -= 1;
    }
    (&raw[..cut], true)
}

/// Single-pass scanner over the input bytes.
///
/// Comments (including their delimiters) become spaces. Literal payloads
/// become spaces with the quotes kept. Everything else is ASCII-uppercased.
/// Multi-byte UTF-8 sequences pass through untouched outside literals and are
/// replaced byte-for-byte with spaces inside them, so byte length never
/// changes.
fn mask_and_fold(input: &str) -> Option<(String, Vec<StringLiteral>)> {
    let src = input.as_bytes();
    let mut out = src.to_vec();
    let mut literals = Vec::new();
    let mut i = 0;
    let len = src.len();

    while i < len {
        match src[i] {
            b'-' if i + 1 < len && src[i + 1] == b'-' => {
                // Line comment: blank through end of line, newline kept.
                while i < len && src[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            b'/' if i + 1 < len && src[i + 1] == b'*' => {
                // Block comment: blank through the closing delimiter, or to
                // end of input when unterminated. Adjacent comments are picked
                // up by the outer loop; nesting is not supported.
                out[i] = b' ';
                out[i + 1] = b' ';
                i += 2;
                while i < len {
                    if src[i] == b'*' && i + 1 < len && src[i + 1] == b'/' {
                        out[i] = b' ';
                        out[i + 1] = b' ';
                        i += 2;
                        break;
                    }
                    out[i] = b' ';
                    i += 1;
                }
            }
            quote @ (b'\'' | b'"') => {
                let payload_start = i + 1;
                i += 1;
                loop {
                    if i >= len {
                        // Unterminated literal: payload runs to end of input.
                        literals.push(StringLiteral {
                            start: payload_start,
                            end: len,
                            value: input[payload_start..len].to_string(),
                        });
                        break;
                    }
                    if quote == b'\'' && src[i] == b'\'' {
                        if i + 1 < len && src[i + 1] == b'\'' {
                            // Escaped single quote, part of the payload.
                            out[i] = b' ';
                            out[i + 1] = b' ';
                            i += 2;
                            continue;
                        }
                        literals.push(StringLiteral {
                            start: payload_start,
                            end: i,
                            value: input[payload_start..i].to_string(),
                        });
                        i += 1;
                        break;
                    }
                    if quote == b'"' {
                        if src[i] == b'\\' && i + 1 < len && src[i + 1] == b'"' {
                            out[i] = b' ';
                            out[i + 1] = b' ';
                            i += 2;
                            continue;
                        }
                        if src[i] == b'"' {
                            literals.push(StringLiteral {
                                start: payload_start,
                                end: i,
                                value: input[payload_start..i].to_string(),
                            });
                            i += 1;
                            break;
                        }
                    }
                    out[i] = b' ';
                    i += 1;
                }
            }
            b => {
                out[i] = b.to_ascii_uppercase();
                i += 1;
            }
        }
    }

    String::from_utf8(out).ok().map(|text| (text, literals))
}
