use thiserror::Error;

pub mod challenge;
pub mod circle;
pub mod circle_event;
pub mod circle_message;
pub mod completion;
pub mod habit;
pub mod user;
pub mod xp_transaction;

/// A field that failed validation before reaching the database.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Checks an optional free-text field against a character limit, trimming it.
pub(crate) fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) if text.chars().count() > max => Err(ValidationError::new(
            field,
            format!("must be at most {max} characters"),
        )),
        Some(text) => Ok(Some(text.to_string())),
    }
}

/// Checks a required text field, trimming it.
pub(crate) fn required_text(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<String, ValidationError> {
    utils::text::trimmed_within(value, min, max).ok_or_else(|| {
        ValidationError::new(field, format!("must be {min}-{max} characters"))
    })
}

/// `HH:MM` in 24-hour time.
pub(crate) fn is_clock_time(value: &str) -> bool {
    let Some((h, m)) = value.split_once(':') else {
        return false;
    };
    h.len() == 2
        && m.len() == 2
        && h.parse::<u8>().is_ok_and(|h| h < 24)
        && m.parse::<u8>().is_ok_and(|m| m < 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_time_accepts_only_24h_hh_mm() {
        assert!(is_clock_time("09:00"));
        assert!(is_clock_time("23:59"));
        assert!(!is_clock_time("24:00"));
        assert!(!is_clock_time("9:00"));
        assert!(!is_clock_time("09-00"));
    }

    #[test]
    fn optional_text_treats_blank_as_absent() {
        assert_eq!(optional_text("notes", Some("   "), 10), Ok(None));
        assert!(optional_text("notes", Some("x".repeat(11).as_str()), 10).is_err());
    }
}
