//! Validation of item identifiers and stage attributes.
//!
//! Both checks run before a mutation touches the ledger, so a rejected
//! call leaves the state and the file unchanged.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::{Attributes, StageName, RESERVED_ATTRIBUTES};
use crate::errors::ValidationError;

/// Maximum accepted length of an item identifier, in characters.
pub const MAX_ITEM_ID_LEN: usize = 256;

static ITEM_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // No whitespace, control characters, or path separators.
    Regex::new(r"^[^\s\p{Cc}/\\]+$").expect("item id pattern is valid")
});

/// Validates an item identifier.
///
/// Ids end up in artifact file names, so path separators are rejected along
/// with whitespace and control characters.
pub fn validate_item_id(item_id: &str) -> Result<(), ValidationError> {
    if item_id.is_empty() {
        return Err(ValidationError::invalid_item_id(item_id, "must not be empty"));
    }

    if item_id.chars().count() > MAX_ITEM_ID_LEN {
        return Err(ValidationError::invalid_item_id(
            item_id,
            format!("longer than {MAX_ITEM_ID_LEN} characters"),
        ));
    }

    if !ITEM_ID_PATTERN.is_match(item_id) {
        return Err(ValidationError::invalid_item_id(
            item_id,
            "contains whitespace, control characters, or path separators",
        ));
    }

    Ok(())
}

/// Validates the attributes recorded when marking `item_id` completed.
pub fn validate_attributes(
    stage: StageName,
    item_id: &str,
    attributes: &Attributes,
) -> Result<(), ValidationError> {
    if let Some(reserved) = attributes
        .keys()
        .find(|key| RESERVED_ATTRIBUTES.contains(&key.as_str()))
    {
        return Err(ValidationError::ReservedAttribute {
            attribute: reserved.clone(),
        });
    }

    if let Some(missing) = stage
        .required_attributes()
        .iter()
        .find(|key| !attributes.contains_key(**key))
    {
        return Err(ValidationError::MissingAttribute {
            stage,
            item_id: item_id.to_string(),
            attribute: (*missing).to_string(),
        });
    }

    Ok(())
}
