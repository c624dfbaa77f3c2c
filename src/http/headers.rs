//! Case-insensitive HTTP header map.

use crate::error::{Error, Result};

/// Headers whose repeated occurrences are joined with `", "` rather than
/// replaced.
const COMMA_JOINABLE: &[&str] = &[
    "connection",
    "upgrade",
    "x-forwarded-for",
    "sec-websocket-protocol",
    "sec-websocket-extensions",
    "accept",
    "accept-encoding",
    "accept-language",
    "cache-control",
    "via",
];

fn is_comma_joinable(name: &str) -> bool {
    COMMA_JOINABLE.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Reject a value that would split the header block.
///
/// # Errors
///
/// Returns `Error::InvalidHeaderValue` if the value contains `\r` or `\n`.
pub(crate) fn validate_header_value(name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// HTTP headers keyed case-insensitively, in first-seen order.
///
/// A repeated header replaces the earlier value, except for the
/// comma-joinable list-valued headers (`Connection`, `Upgrade`,
/// `X-Forwarded-For`, ...) whose values are joined with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse header lines up to the first empty line.
    ///
    /// Names are trimmed and values stripped of surrounding whitespace.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHeaderValue` for a line without a colon, an empty or
    /// whitespace-containing name, or an obsolete folded continuation line.
    pub fn parse_lines<'a, I>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut headers = Self::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                return Err(Error::InvalidHeaderValue {
                    header: line.trim().to_string(),
                    reason: "folded header lines are not supported".to_string(),
                });
            }
            let (name, value) = line.split_once(':').ok_or_else(|| Error::InvalidHeaderValue {
                header: line.to_string(),
                reason: "missing ':' separator".to_string(),
            })?;
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(Error::InvalidHeaderValue {
                    header: name.to_string(),
                    reason: "invalid header name".to_string(),
                });
            }
            headers.insert(name, value.trim());
        }
        Ok(headers)
    }

    /// Insert a header, replacing or joining any existing value.
    pub fn insert(&mut self, name: &str, value: &str) {
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) if is_comma_joinable(name) && !existing.is_empty() => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            Some((_, existing)) => *existing = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether a comma-separated header carries `token` (case-insensitive).
    #[must_use]
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|value| {
            value
                .split(',')
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
        })
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self
            .entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index).1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, value)` pairs; names keep the case first seen.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}
