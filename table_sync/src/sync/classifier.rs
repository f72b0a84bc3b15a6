//! Classification of one merge-join position

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};
use crate::sync::cursor::HashedRow;

/// What the destination needs for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Present in the source only
    Insert,
    /// Present on both sides with different content
    Update,
    /// Present in the destination only
    Delete,
    /// Present on both sides with identical content
    None,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
            ChangeType::None => "NONE",
        };
        write!(f, "{}", name)
    }
}

/// Classify the rows under the source and destination cursors
pub fn classify(source: Option<&HashedRow>, destination: Option<&HashedRow>) -> Result<ChangeType> {
    let change = match (source, destination) {
        (None, None) => {
            return Err(Error::ClassifierDefect(
                "both cursors are exhausted".to_string(),
            ))
        }
        (Some(_), None) => ChangeType::Insert,
        (None, Some(_)) => ChangeType::Delete,
        (Some(src), Some(dst)) => match src.key.cmp(&dst.key) {
            Ordering::Less => ChangeType::Insert,
            Ordering::Greater => ChangeType::Delete,
            Ordering::Equal if src.hash == dst.hash => ChangeType::None,
            Ordering::Equal => ChangeType::Update,
        },
    };
    Ok(change)
}
