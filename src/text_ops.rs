//! Value normalization shared by every extractor
//!
//! Order of operations on a resolved raw value:
//! regex capture, delete text, find/replace, trim.

use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{CatalogError, Result};
use crate::mapping::FieldOptions;

/// Compiled post-processing steps of one field spec
#[derive(Debug, Clone, Default)]
pub struct TextOps {
    regex: Option<Regex>,
    delete_text: Option<String>,
    find_replace: Option<(String, String)>,
}

impl TextOps {
    /// Compile the text options of a field. Fails only on a bad regex.
    pub fn from_options(options: &FieldOptions) -> Result<Self> {
        let regex = match options.regex.as_deref().map(str::trim) {
            Some(pattern) if !pattern.is_empty() => Some(Regex::new(pattern).map_err(|e| {
                CatalogError::Address(format!("invalid regex `{pattern}`: {e}"))
            })?),
            _ => None,
        };

        let delete_text = options
            .delete_text
            .clone()
            .filter(|text| !text.is_empty());

        let find_replace = match (&options.find_text, &options.replace_text) {
            (Some(find), Some(replace)) if !find.is_empty() => {
                Some((find.clone(), replace.clone()))
            }
            _ => None,
        };

        Ok(Self {
            regex,
            delete_text,
            find_replace,
        })
    }

    /// No regex, deletion or replacement configured
    pub fn is_noop(&self) -> bool {
        self.regex.is_none() && self.delete_text.is_none() && self.find_replace.is_none()
    }

    pub fn apply(&self, value: &str) -> String {
        let mut out = match &self.regex {
            Some(re) => capture_groups(re, value),
            None => value.to_string(),
        };

        if let Some(ref delete) = self.delete_text {
            out = out.replace(delete.as_str(), "");
        }

        if let Some((ref find, ref replace)) = self.find_replace {
            out = out.replace(find.as_str(), replace);
        }

        out.trim().to_string()
    }
}

/// Space-joined capture groups of every match; the whole match when the
/// pattern has no groups. Empty when nothing matches.
fn capture_groups(re: &Regex, value: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for caps in re.captures_iter(value) {
        if caps.len() > 1 {
            parts.extend(
                caps.iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str())
                    .filter(|s| !s.is_empty()),
            );
        } else if let Some(m) = caps.get(0) {
            parts.push(m.as_str());
        }
    }

    parts.join(" ")
}

/// Numeric coercion for price and quantity fields.
///
/// Removes all whitespace (including no-break spaces used as thousands
/// separators), turns a comma into a decimal point and parses the rest.
pub fn parse_decimal(value: &str) -> Option<Decimal> {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned).ok()
}

/// List coercion: split, trim each part, drop empty parts.
///
/// Returns `None` when either the value or the separator is missing/empty.
pub fn split_list(value: Option<&str>, separator: Option<&str>) -> Option<Vec<String>> {
    let value = value.filter(|v| !v.is_empty())?;
    let separator = separator.filter(|s| !s.is_empty())?;

    Some(
        value
            .split(separator)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// Collapse whitespace runs to single spaces and trim
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
