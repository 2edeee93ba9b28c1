//! Resource tags and the reserved system prefixes

use crate::error::StepError;
use crate::state::ResourceInfo;
use serde::{Deserialize, Serialize};

/// Tag key prefixes reserved for system use
pub const RESERVED_PREFIXES: &[&str] = &["aws:", "euca:"];

pub const STACK_NAME_TAG: &str = "aws:cloudformation:stack-name";
pub const STACK_ID_TAG: &str = "aws:cloudformation:stack-id";
pub const LOGICAL_ID_TAG: &str = "aws:cloudformation:logical-id";

/// A key/value tag
///
/// Deserializes from both `key`/`value` and the template form `Key`/`Value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    #[serde(alias = "Key")]
    pub key: String,
    #[serde(alias = "Value")]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse a `key=value` pair
    pub fn parse(s: &str) -> Option<Self> {
        let (key, value) = s.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key, value.trim()))
    }

    pub fn reserved_prefix(&self) -> Option<&'static str> {
        RESERVED_PREFIXES
            .iter()
            .copied()
            .find(|prefix| self.key.to_lowercase().starts_with(prefix))
    }
}

/// Reject user tags whose keys collide with a reserved prefix
pub fn check_reserved(tags: &[Tag]) -> Result<(), StepError> {
    for tag in tags {
        if let Some(prefix) = tag.reserved_prefix() {
            return Err(StepError::validation(format!(
                "Tag key {} uses reserved prefix {}",
                tag.key, prefix
            )));
        }
    }
    Ok(())
}

/// Tags written under the privileged principal
pub fn system_tags(info: &ResourceInfo) -> Vec<Tag> {
    vec![
        Tag::new(STACK_NAME_TAG, &info.stack.stack_name),
        Tag::new(STACK_ID_TAG, &info.stack.stack_id),
        Tag::new(LOGICAL_ID_TAG, &info.logical_resource_id),
    ]
}

/// Stack tags followed by user tags; a user tag wins on key collision.
///
/// Fails before producing anything if a user tag is reserved.
pub fn user_tags(info: &ResourceInfo, user: &[Tag]) -> Result<Vec<Tag>, StepError> {
    check_reserved(user)?;

    let mut merged: Vec<Tag> = info
        .stack
        .tags
        .iter()
        .filter(|t| !user.iter().any(|u| u.key == t.key))
        .cloned()
        .collect();
    merged.extend(user.iter().cloned());
    Ok(merged)
}

/// Tags from `desired` that are absent from, or differ in, `existing`
pub fn missing_tags(desired: &[Tag], existing: &[Tag]) -> Vec<Tag> {
    desired
        .iter()
        .filter(|d| !existing.contains(d))
        .cloned()
        .collect()
}
