//! Well-formedness checks for task schedule expressions.
//!
//! Two grammars are accepted, matching what the scheduler backend supports:
//! an interval (`15 MINUTE`) or a cron line with a trailing time zone
//! (`USING CRON 0 6 * * * America/Chicago`). Only shape is validated here;
//! semantic feasibility is the backend's problem.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::TaskError;

fn interval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)\s+MINUTES?$").unwrap())
}

fn cron_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\dA-Za-z*,/\-]+$").unwrap())
}

fn invalid(expression: &str, reason: &str) -> TaskError {
    TaskError::InvalidSchedule {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

/// Validates a schedule expression, returning it trimmed on success.
pub fn validate(expression: &str) -> Result<String, TaskError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(invalid(expression, "expression is empty"));
    }

    if let Some(caps) = interval_re().captures(trimmed) {
        let minutes: u64 = caps[1]
            .parse()
            .map_err(|_| invalid(expression, "interval does not fit in a u64"))?;
        if minutes == 0 {
            return Err(invalid(expression, "interval must be at least 1 minute"));
        }
        return Ok(trimmed.to_string());
    }

    let upper = trimmed.to_ascii_uppercase();
    if let Some(rest) = upper
        .strip_prefix("USING CRON")
        .map(|_| trimmed["USING CRON".len()..].trim())
    {
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() != 6 {
            return Err(invalid(
                expression,
                "cron schedule needs 5 fields and a time zone",
            ));
        }
        for field in &tokens[..5] {
            if !cron_field_re().is_match(field) {
                return Err(invalid(
                    expression,
                    &format!("cron field '{}' contains unsupported characters", field),
                ));
            }
        }
        return Ok(trimmed.to_string());
    }

    Err(invalid(
        expression,
        "expected '<n> MINUTE' or 'USING CRON <fields> <tz>'",
    ))
}
