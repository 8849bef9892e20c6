//! Identifier sanitization.
//!
//! Table, column, index and namespace names are the only caller-supplied text
//! ever concatenated into SQL. Every such name passes through this module
//! first. Sanitization strips characters instead of failing; callers that
//! need a non-empty name use [`ensure_identifier`].

use crate::error::FilterError;

/// Strips everything except letters, ASCII digits and `_`.
///
/// A name that starts with a digit gets a leading `_`.
///
/// ```
/// use quarry_persistence::sql::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("first name"), "firstname");
/// assert_eq!(sanitize_identifier("x\"; drop table users; --"), "xdroptableusers");
/// assert_eq!(sanitize_identifier("2fast"), "_2fast");
/// assert_eq!(sanitize_identifier("prénom"), "prénom");
/// ```
pub fn sanitize_identifier(name: &str) -> String {
    with_digit_guard(name.chars().filter(|c| is_identifier_char(*c)).collect())
}

/// Like [`sanitize_identifier`], but keeps `.` and `"` for qualified names.
pub fn sanitize_qualified(name: &str) -> String {
    with_digit_guard(
        name.chars()
            .filter(|c| is_identifier_char(*c) || *c == '.' || *c == '"')
            .collect(),
    )
}

/// Sanitizes `name` and fails if nothing usable is left.
pub fn ensure_identifier(name: &str) -> Result<String, FilterError> {
    let sanitized = sanitize_identifier(name);
    if sanitized.is_empty() {
        return Err(FilterError::EmptyIdentifier {
            raw: name.to_string(),
        });
    }
    Ok(sanitized)
}

/// Sanitizes and double-quotes a single identifier.
///
/// ```
/// use quarry_persistence::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("author").unwrap(), "\"author\"");
/// assert!(quote_identifier("!!").is_err());
/// ```
pub fn quote_identifier(name: &str) -> Result<String, FilterError> {
    Ok(format!("\"{}\"", ensure_identifier(name)?))
}

/// Sanitizes and quotes a possibly qualified name, one segment at a time.
///
/// ```
/// use quarry_persistence::sql::quote_qualified;
///
/// assert_eq!(quote_qualified("books.author").unwrap(), "\"books\".\"author\"");
/// assert_eq!(quote_qualified("\"books\".\"author\"").unwrap(), "\"books\".\"author\"");
/// ```
pub fn quote_qualified(name: &str) -> Result<String, FilterError> {
    let segments = name
        .split('.')
        .map(quote_identifier)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(segments.join("."))
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphabetic() || c.is_ascii_digit() || c == '_'
}

fn with_digit_guard(sanitized: String) -> String {
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_disallowed() {
        assert_eq!(sanitize_identifier("a-b c"), "abc");
        assert_eq!(sanitize_identifier("a\"b"), "ab");
        assert_eq!(sanitize_identifier("under_score_1"), "under_score_1");
        assert_eq!(sanitize_identifier(""), "");
    }

    #[test]
    fn test_sanitize_keeps_unicode_letters() {
        assert_eq!(sanitize_identifier("Größe"), "Größe");
        assert_eq!(sanitize_identifier("名前"), "名前");
    }

    #[test]
    fn test_leading_digit_prefixed() {
        assert_eq!(sanitize_identifier("1st"), "_1st");
        assert_eq!(sanitize_identifier("-1st"), "_1st");
    }

    #[test]
    fn test_sanitize_qualified_keeps_dots_and_quotes() {
        assert_eq!(sanitize_qualified("\"s\".\"t\""), "\"s\".\"t\"");
        assert_eq!(sanitize_qualified("s.t; --"), "s.t");
    }

    #[test]
    fn test_ensure_identifier_rejects_empty() {
        let err = ensure_identifier("--;").unwrap_err();
        assert_eq!(
            err,
            FilterError::EmptyIdentifier {
                raw: "--;".to_string()
            }
        );
    }

    #[test]
    fn test_quote_qualified_rejects_empty_segment() {
        assert!(quote_qualified("books.").is_err());
    }

    #[test]
    fn test_quoted_output_never_contains_inner_quotes() {
        for hostile in ["a\"b", "x\" OR 1=1 --", "\"\"", "t\".\"u"] {
            if let Ok(quoted) = quote_identifier(hostile) {
                let inner = &quoted[1..quoted.len() - 1];
                assert!(!inner.contains('"'), "{}", quoted);
            }
        }
    }
}
