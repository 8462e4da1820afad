use crate::error::{RecError, RecResult};
use crate::models::*;

pub const MAX_SCOPE_KEY_LEN: usize = 255;

pub fn validate_rating(rating: &Rating) -> RecResult<()> {
    if !rating.is_in_range() {
        return Err(RecError::InvalidRating(format!(
            "score {} must be between {} and {}",
            rating.score, MIN_RATING, MAX_RATING
        )));
    }

    if rating.item_id <= 0 {
        return Err(RecError::InvalidRating("Item ID must be positive".to_string()));
    }

    if let Some(rater_id) = rating.rater_id {
        if rater_id <= 0 {
            return Err(RecError::InvalidRating("Rater ID must be positive".to_string()));
        }
    }

    // Allow a little clock skew, nothing more.
    let max_future = chrono::Utc::now() + chrono::Duration::hours(1);
    if rating.created_at > max_future {
        return Err(RecError::InvalidRating(
            "Timestamp cannot be more than 1 hour in the future".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_scope_key(scope_key: &str) -> RecResult<()> {
    if scope_key.trim().is_empty() {
        return Err(RecError::InvalidEvent("Scope key cannot be empty".to_string()));
    }

    if scope_key.len() > MAX_SCOPE_KEY_LEN {
        return Err(RecError::InvalidEvent(format!(
            "Scope key too long: {} characters (max {})",
            scope_key.len(),
            MAX_SCOPE_KEY_LEN
        )));
    }

    Ok(())
}

pub fn validate_new_event(event: &NewEvent) -> RecResult<()> {
    if event.rater_id <= 0 {
        return Err(RecError::InvalidEvent("Rater ID must be positive".to_string()));
    }

    if event.item_id <= 0 {
        return Err(RecError::InvalidEvent("Item ID must be positive".to_string()));
    }

    validate_scope_key(&event.scope_key)?;

    if !(event.metadata.is_null() || event.metadata.is_object()) {
        return Err(RecError::InvalidEvent(
            "Metadata must be a JSON object".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_limit(limit: usize, max_limit: usize) -> RecResult<()> {
    if limit == 0 {
        return Err(RecError::InvalidRequest(
            "Number of recommendations must be greater than 0".to_string(),
        ));
    }

    if limit > max_limit {
        return Err(RecError::InvalidRequest(format!(
            "Number of recommendations too large (max {})",
            max_limit
        )));
    }

    Ok(())
}

pub fn validate_min_score(min_score: f32) -> RecResult<()> {
    if !min_score.is_finite() {
        return Err(RecError::InvalidRequest(
            "Minimum score must be a finite number".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_batch_size(batch_size: usize, max_batch_size: usize) -> RecResult<()> {
    if batch_size > max_batch_size {
        return Err(RecError::InvalidEvent(format!(
            "Batch size too large: {} (max {})",
            batch_size, max_batch_size
        )));
    }

    Ok(())
}
