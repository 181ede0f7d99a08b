use rand::{Rng, distributions::Alphanumeric};

/// Random upper-case alphanumeric code, used for circle invites.
pub fn invite_code(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect()
}

/// Trims `value` and checks its length in characters lies in `min..=max`.
pub fn trimmed_within(value: &str, min: usize, max: usize) -> Option<String> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    (min..=max).contains(&len).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_code_is_uppercase_alphanumeric() {
        let code = invite_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn trimmed_within_counts_chars_after_trim() {
        assert_eq!(trimmed_within("  run  ", 3, 5).as_deref(), Some("run"));
        assert!(trimmed_within("  ab ", 3, 5).is_none());
        assert_eq!(trimmed_within("ééé", 3, 3).as_deref(), Some("ééé"));
    }
}
