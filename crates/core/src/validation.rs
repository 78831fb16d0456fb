//! Input validation utilities.
//!
//! Functions here check caller-supplied values before any ledger write is attempted.

use crate::constants::{MAX_NOTES_LEN, MAX_TARGETS_PER_REQUEST};
use crate::{QuoteError, QuoteResult};
use std::collections::HashSet;
use uuid::Uuid;

/// Normalises optional free text: trims it, maps blank to `None`, and bounds its length.
///
/// # Errors
///
/// Returns `QuoteError::Validation` if the trimmed text exceeds `MAX_NOTES_LEN` characters.
pub fn validate_free_text(field: &str, value: Option<String>) -> QuoteResult<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if trimmed.chars().count() > MAX_NOTES_LEN {
        return Err(QuoteError::Validation(format!(
            "{field} exceeds maximum length of {MAX_NOTES_LEN} characters"
        )));
    }

    Ok(Some(trimmed.to_string()))
}

/// Deduplicates the requested provider ids, keeping first-seen order.
///
/// # Errors
///
/// Returns `QuoteError::Validation` if the list is empty or names more than
/// `MAX_TARGETS_PER_REQUEST` distinct providers.
pub fn dedup_provider_ids(provider_ids: &[Uuid]) -> QuoteResult<Vec<Uuid>> {
    let mut seen = HashSet::with_capacity(provider_ids.len());
    let unique: Vec<Uuid> = provider_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    if unique.is_empty() {
        return Err(QuoteError::Validation(
            "at least one provider must be selected".into(),
        ));
    }

    if unique.len() > MAX_TARGETS_PER_REQUEST {
        return Err(QuoteError::Validation(format!(
            "a request may target at most {MAX_TARGETS_PER_REQUEST} providers"
        )));
    }

    Ok(unique)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_becomes_none() {
        assert_eq!(validate_free_text("notes", Some("   ".into())).unwrap(), None);
        assert_eq!(validate_free_text("notes", None).unwrap(), None);
        assert_eq!(
            validate_free_text("notes", Some(" deliver after 5pm ".into())).unwrap(),
            Some("deliver after 5pm".into())
        );
    }

    #[test]
    fn overlong_text_is_rejected() {
        let long = "x".repeat(MAX_NOTES_LEN + 1);
        assert!(matches!(
            validate_free_text("notes", Some(long)),
            Err(QuoteError::Validation(_))
        ));
    }

    #[test]
    fn dedup_keeps_order_and_rejects_empty() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup_provider_ids(&[a, b, a, b]).unwrap(), vec![a, b]);
        assert!(dedup_provider_ids(&[]).is_err());
    }

    #[test]
    fn dedup_bounds_target_count() {
        let ids: Vec<Uuid> = (0..=MAX_TARGETS_PER_REQUEST).map(|_| Uuid::new_v4()).collect();
        assert!(dedup_provider_ids(&ids).is_err());
    }
}
