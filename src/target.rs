//! Profile-address validation and normalization.
//!
//! Adapter at the engine boundary: turns whatever the operator typed into a
//! canonical profile URL, or rejects it with correction suggestions. The
//! engine itself treats the result as opaque data.

use crate::error::GarimpoError;

/// A validated, normalized profile address plus its extracted handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTarget {
    /// Canonical form: `https://<host>/in/<handle>`.
    pub url: String,
    /// Profile handle, used for session naming and output filenames.
    pub handle: String,
}

impl ProfileTarget {
    /// Validate and normalize a raw profile address.
    ///
    /// Accepts `http(s)://<host>/in/<handle>` with an optional trailing
    /// slash or query string; everything else is rejected with up to three
    /// correction suggestions embedded in the error message.
    pub fn parse(raw: &str) -> Result<Self, GarimpoError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GarimpoError::InvalidTarget(
                "profile address cannot be empty".into(),
            ));
        }

        let Some(rest) = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
        else {
            return Err(invalid(trimmed, "address must start with https://"));
        };

        // Drop query string and fragment before splitting the path.
        let rest = rest.split(['?', '#']).next().unwrap_or(rest);
        let mut segments = rest.split('/');

        let host = segments.next().unwrap_or_default().to_ascii_lowercase();
        if host.is_empty() || !host.contains('.') {
            return Err(invalid(trimmed, "address has no valid host"));
        }

        let (section, handle) = (segments.next(), segments.next());
        if section != Some("in") {
            return Err(invalid(trimmed, "expected a /in/<handle> profile path"));
        }

        let handle = handle.unwrap_or_default().trim_end_matches('/');
        if handle.is_empty() || !is_valid_handle(handle) {
            return Err(invalid(trimmed, "profile handle is missing or malformed"));
        }
        if segments.any(|s| !s.is_empty()) {
            return Err(invalid(trimmed, "unexpected path after the profile handle"));
        }

        Ok(Self {
            url: format!("https://{host}/in/{handle}"),
            handle: handle.to_string(),
        })
    }
}

fn is_valid_handle(handle: &str) -> bool {
    handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn invalid(raw: &str, reason: &str) -> GarimpoError {
    let suggestions = suggest_corrections(raw);
    let msg = if suggestions.is_empty() {
        reason.to_string()
    } else {
        format!("{reason}. Did you mean: {}", suggestions.join(", "))
    };
    GarimpoError::InvalidTarget(msg)
}

/// Propose likely fixes for a rejected address, most plausible first.
pub fn suggest_corrections(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let mut suggestions = Vec::new();

    if !trimmed.is_empty() && !trimmed.contains("://") {
        if trimmed.contains("/in/") {
            suggestions.push(format!("https://{trimmed}"));
        } else if is_valid_handle(trimmed) {
            // A bare handle: assume the default host.
            suggestions.push(format!("https://feed.garimpo.dev/in/{trimmed}"));
        }
    }

    if let Some(rest) = trimmed.strip_prefix("http://") {
        suggestions.push(format!("https://{rest}"));
    }

    if trimmed.contains("://") && !trimmed.contains("/in/") {
        if let Some((scheme_host, _)) = trimmed.split_once("://").and_then(|(s, r)| {
            let host = r.split('/').next()?;
            Some((format!("{s}://{host}"), r))
        }) {
            suggestions.push(format!("{scheme_host}/in/<handle>"));
        }
    }

    suggestions.truncate(3);
    suggestions
}
