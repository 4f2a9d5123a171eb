//! Read-only safety gate.
//!
//! A statement batch is split into sub-statements on top-level semicolons and
//! every sub-statement must open with a whitelisted keyword. MySQL executable
//! comments (`/*! ... */`, `/*!50000 ... */`, `/*M! ... */`) are expanded in
//! place because the server runs their body. Tokenizer failures count as
//! dangerous.

use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};

/// Leading keywords allowed against a non-sandbox address.
pub const READ_ONLY_KEYWORDS: [&str; 5] = ["select", "show", "explain", "describe", "desc"];

/// Body of an executable comment, version prefix removed.
fn executable_body(comment: &str) -> Option<&str> {
    let rest = comment.strip_prefix('!').or_else(|| comment.strip_prefix("M!"))?;
    Some(rest.trim_start_matches(|c: char| c.is_ascii_digit()))
}

/// Tokenizes `sql`, splicing executable comment bodies into the stream.
fn expanded_tokens(sql: &str) -> Option<Vec<Token>> {
    let dialect = MySqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize().ok()?;

    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Token::Whitespace(Whitespace::MultiLineComment(text)) = &token {
            if let Some(body) = executable_body(text) {
                out.push(Token::Whitespace(Whitespace::Space));
                out.extend(expanded_tokens(body)?);
                out.push(Token::Whitespace(Whitespace::Space));
                continue;
            }
        }
        out.push(token);
    }
    Some(out)
}

/// 세미콜론 기준으로 분리한 각 문장의 첫 키워드 (빈 문장 제외)
///
/// Returns `None` when the text cannot be tokenized.
pub fn leading_keywords(sql: &str) -> Option<Vec<String>> {
    let mut keywords = Vec::new();
    let mut expecting = true;
    for token in expanded_tokens(sql)? {
        match token {
            Token::SemiColon => expecting = true,
            // optimizer hint cannot open a statement
            Token::Whitespace(Whitespace::MultiLineComment(text)) if expecting && text.starts_with('+') => {
                keywords.push("/*+".to_string());
                expecting = false;
            }
            Token::Whitespace(_) | Token::LParen if expecting => {}
            Token::Word(word) if expecting => {
                keywords.push(word.value.to_ascii_lowercase());
                expecting = false;
            }
            _ if expecting => {
                // statement starting with something other than a word
                keywords.push(token.to_string());
                expecting = false;
            }
            _ => {}
        }
    }
    Some(keywords)
}

/// `true` when any sub-statement falls outside the read-only whitelist.
pub fn is_dangerous(sql: &str) -> bool {
    match leading_keywords(sql) {
        Some(keywords) => keywords
            .iter()
            .any(|kw| !READ_ONLY_KEYWORDS.contains(&kw.as_str())),
        None => true,
    }
}

/// A single session-scoped `SET` (`set @@profiling=1`, `SET SESSION ...`).
///
/// Global, persisted and password assignments do not qualify.
pub fn is_session_setting(sql: &str) -> bool {
    let single_set = leading_keywords(sql).is_some_and(|kw| kw.len() == 1 && kw[0] == "set");
    let lower = sql.to_ascii_lowercase();
    single_set && !["global", "persist", "password"].iter().any(|w| lower.contains(w))
}
