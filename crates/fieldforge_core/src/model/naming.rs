//! Physical identifier derivation for dynamic attributes.
//!
//! # Responsibility
//! - Turn a free-form user label into a canonical column identifier.
//! - Own the identifier grammar every SQL-touching component checks.
//!
//! # Invariants
//! - Every derived name starts with `RESERVED_PREFIX`.
//! - Derived names contain only `[a-z0-9_]`.
//! - The character right after the prefix is never a digit.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Marker keeping dynamic attributes apart from built-in fields.
pub const RESERVED_PREFIX: &str = "x_";

/// Common relational identifier length limit.
pub const DEFAULT_MAX_NAME_LEN: usize = 63;

static PHYSICAL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^x_[a-z0-9_]*[a-z0-9][a-z0-9_]*$").expect("valid name regex"));
static UNDERSCORE_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_{2,}").expect("valid underscore regex"));

/// Reasons a label cannot become a physical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// Nothing usable remains after normalization.
    Empty { raw_label: String },
    /// Derived identifier exceeds the configured limit.
    TooLong { physical_name: String, max_len: usize },
}

impl Display for NamingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty { raw_label } => {
                write!(f, "label `{raw_label}` yields an empty identifier")
            }
            Self::TooLong {
                physical_name,
                max_len,
            } => write!(
                f,
                "identifier `{physical_name}` is longer than {max_len} characters"
            ),
        }
    }
}

impl Error for NamingError {}

/// Derives the physical name for `raw_label` with the default length limit.
pub fn normalize(raw_label: &str) -> Result<String, NamingError> {
    normalize_with_limit(raw_label, DEFAULT_MAX_NAME_LEN)
}

/// Derives the physical name for `raw_label`.
///
/// Rules:
/// - ASCII letters are lower-cased, digits kept.
/// - Whitespace and ASCII punctuation collapse to one `_`.
/// - Any other character is stripped.
/// - A label already carrying the prefix is not prefixed twice.
/// - A digit right after the prefix gets an extra `_`.
pub fn normalize_with_limit(raw_label: &str, max_len: usize) -> Result<String, NamingError> {
    let mut body = String::with_capacity(raw_label.len());
    for ch in raw_label.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            body.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch.is_ascii_punctuation() {
            body.push('_');
        }
    }

    let collapsed = UNDERSCORE_RUN_RE.replace_all(&body, "_");
    let leading = collapsed.trim_start_matches('_');
    let unprefixed = leading
        .strip_prefix(RESERVED_PREFIX)
        .unwrap_or(leading)
        .trim_matches('_');
    if unprefixed.is_empty() {
        return Err(NamingError::Empty {
            raw_label: raw_label.to_string(),
        });
    }

    let mut physical_name = String::with_capacity(RESERVED_PREFIX.len() + unprefixed.len() + 1);
    physical_name.push_str(RESERVED_PREFIX);
    if unprefixed.starts_with(|ch: char| ch.is_ascii_digit()) {
        physical_name.push('_');
    }
    physical_name.push_str(unprefixed);

    if physical_name.len() > max_len {
        return Err(NamingError::TooLong {
            physical_name,
            max_len,
        });
    }

    Ok(physical_name)
}

/// Returns whether `name` matches the dynamic identifier grammar.
pub fn is_valid_physical_name(name: &str) -> bool {
    PHYSICAL_NAME_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::{is_valid_physical_name, normalize, normalize_with_limit, NamingError};

    #[test]
    fn normalize_lowercases_and_prefixes() {
        assert_eq!(normalize("Priority Level").unwrap(), "x_priority_level");
        assert_eq!(normalize("  Due-Date (UTC) ").unwrap(), "x_due_date_utc");
    }

    #[test]
    fn normalize_does_not_double_prefix() {
        assert_eq!(normalize("x_color").unwrap(), "x_color");
        assert_eq!(normalize("X Color").unwrap(), "x_color");
    }

    #[test]
    fn builtin_names_are_prefixed_apart() {
        assert_eq!(normalize("person").unwrap(), "x_person");
        assert_eq!(normalize("Name").unwrap(), "x_name");
    }

    #[test]
    fn normalize_guards_leading_digit() {
        assert_eq!(normalize("2nd Reviewer").unwrap(), "x__2nd_reviewer");
        assert!(is_valid_physical_name("x__2nd_reviewer"));
    }

    #[test]
    fn normalize_strips_non_ascii_letters() {
        assert_eq!(normalize("Año fiscal").unwrap(), "x_ao_fiscal");
    }

    #[test]
    fn normalize_rejects_empty_results() {
        assert!(matches!(normalize("!!!"), Err(NamingError::Empty { .. })));
        assert!(matches!(normalize("   "), Err(NamingError::Empty { .. })));
        assert!(matches!(normalize("x_"), Err(NamingError::Empty { .. })));
        assert!(matches!(normalize("ñ"), Err(NamingError::Empty { .. })));
    }

    #[test]
    fn normalize_rejects_overlong_identifiers() {
        let err = normalize_with_limit("a very long label indeed", 10).unwrap_err();
        assert!(matches!(err, NamingError::TooLong { max_len: 10, .. }));
    }

    #[test]
    fn grammar_rejects_foreign_identifiers() {
        assert!(is_valid_physical_name("x_priority_level"));
        assert!(!is_valid_physical_name("priority"));
        assert!(!is_valid_physical_name("x_"));
        assert!(!is_valid_physical_name("x_Upper"));
        assert!(!is_valid_physical_name("x_a; DROP TABLE task_board"));
    }
}
