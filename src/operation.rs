//! The reversible change operations exchanged between editing instances

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of the instance that authored an operation
pub type InstanceId = String;

/// Validation errors for operations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OperationError {
    #[error("File path must not be empty")]
    EmptyFilePath,

    #[error("{0:?} operations require a 1-based line and column")]
    MissingPosition(OpKind),

    #[error("{0:?} operations carry no position; line and column must be zero")]
    UnexpectedPosition(OpKind),

    #[error("Content length field {recorded} does not match payload length {actual}")]
    LengthMismatch { recorded: usize, actual: usize },

    #[error("Replace operations must carry the replaced content")]
    MissingPreImage,

    #[error("Delete operations must carry the removed content")]
    MissingContent,
}

/// The kinds of change an instance can record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Content insertion at a position
    Insert,
    /// Content deletion at a position
    Delete,
    /// Content replacement at a position
    Replace,
    /// Metadata modification (no position)
    MetaChange,
    /// Resource modification (no position)
    Resource,
}

impl OpKind {
    /// Whether operations of this kind carry a line/column position
    pub fn is_positional(&self) -> bool {
        matches!(self, OpKind::Insert | OpKind::Delete | OpKind::Replace)
    }
}

/// A single reversible change to a file or resource.
///
/// Operations are immutable once committed. `timestamp_ns` is assigned by
/// the runtime at commit time and `operation_id` by the persistence layer
/// on append; both are zero on freshly constructed operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    /// Relative path the change applies to
    pub file_path: String,
    /// 1-based line, zero for non-positional kinds
    pub line: u32,
    /// 1-based column, zero for non-positional kinds
    pub column: u32,
    /// Payload bytes: text written for Insert/Replace, text removed for Delete
    pub content: Vec<u8>,
    /// Byte length of `content`; always kept equal to `content.len()`
    pub content_length: usize,
    /// Pre-image for Replace (and optionally MetaChange/Resource), needed
    /// to compute a true reversal
    pub replaced: Option<Vec<u8>>,
    /// Nanoseconds since epoch, assigned at commit
    pub timestamp_ns: u64,
    /// Instance that authored this operation
    pub origin: InstanceId,
    /// Log-assigned identifier, unique and increasing per log
    pub operation_id: u64,
}

impl Operation {
    fn new(
        kind: OpKind,
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        content: Vec<u8>,
        replaced: Option<Vec<u8>>,
        origin: impl Into<InstanceId>,
    ) -> Self {
        let content_length = content.len();
        Self {
            kind,
            file_path: file_path.into(),
            line,
            column,
            content,
            content_length,
            replaced,
            timestamp_ns: 0,
            origin: origin.into(),
            operation_id: 0,
        }
    }

    /// Create an Insert operation
    pub fn insert(
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        content: impl Into<Vec<u8>>,
        origin: impl Into<InstanceId>,
    ) -> Self {
        Self::new(OpKind::Insert, file_path, line, column, content.into(), None, origin)
    }

    /// Create a Delete operation; `content` holds the removed text
    pub fn delete(
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        content: impl Into<Vec<u8>>,
        origin: impl Into<InstanceId>,
    ) -> Self {
        Self::new(OpKind::Delete, file_path, line, column, content.into(), None, origin)
    }

    /// Create a Replace operation; `replaced` holds the pre-image
    pub fn replace(
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        content: impl Into<Vec<u8>>,
        replaced: impl Into<Vec<u8>>,
        origin: impl Into<InstanceId>,
    ) -> Self {
        Self::new(
            OpKind::Replace,
            file_path,
            line,
            column,
            content.into(),
            Some(replaced.into()),
            origin,
        )
    }

    /// Create a MetaChange operation
    pub fn meta_change(
        file_path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        origin: impl Into<InstanceId>,
    ) -> Self {
        Self::new(OpKind::MetaChange, file_path, 0, 0, content.into(), None, origin)
    }

    /// Create a Resource operation
    pub fn resource(
        file_path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        origin: impl Into<InstanceId>,
    ) -> Self {
        Self::new(OpKind::Resource, file_path, 0, 0, content.into(), None, origin)
    }

    /// Attach a pre-image to a MetaChange or Resource operation
    pub fn with_pre_image(mut self, replaced: impl Into<Vec<u8>>) -> Self {
        self.replaced = Some(replaced.into());
        self
    }

    /// Check the structural invariants of this operation
    pub fn validate(&self) -> Result<(), OperationError> {
        if self.file_path.is_empty() {
            return Err(OperationError::EmptyFilePath);
        }
        if self.kind.is_positional() {
            if self.line == 0 || self.column == 0 {
                return Err(OperationError::MissingPosition(self.kind));
            }
        } else if self.line != 0 || self.column != 0 {
            return Err(OperationError::UnexpectedPosition(self.kind));
        }
        if self.content_length != self.content.len() {
            return Err(OperationError::LengthMismatch {
                recorded: self.content_length,
                actual: self.content.len(),
            });
        }
        match self.kind {
            OpKind::Replace if self.replaced.is_none() => Err(OperationError::MissingPreImage),
            OpKind::Delete if self.content.is_empty() => Err(OperationError::MissingContent),
            _ => Ok(()),
        }
    }

    /// Compute the operation that reverses this one.
    ///
    /// Insert and Delete invert into each other at the same position,
    /// carrying the affected text. Replace, MetaChange and Resource keep
    /// their kind with content and pre-image swapped. The result carries
    /// zero timestamp and operation id (assigned when it is committed or
    /// received downstream) and `origin` names the reversing instance.
    pub fn reversal(&self, origin: impl Into<InstanceId>) -> Operation {
        let (kind, content, replaced) = match self.kind {
            OpKind::Insert => (OpKind::Delete, self.content.clone(), None),
            OpKind::Delete => (OpKind::Insert, self.content.clone(), None),
            kind => (
                kind,
                self.replaced.clone().unwrap_or_default(),
                Some(self.content.clone()),
            ),
        };
        Operation::new(
            kind,
            self.file_path.clone(),
            self.line,
            self.column,
            content,
            replaced,
            origin,
        )
    }

    /// Content as UTF-8, lossy; convenience for logging and display
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_length() {
        let op = Operation::insert("a.txt", 1, 1, "hello", "inst-a");
        assert_eq!(op.content_length, 5);
        assert_eq!(op.operation_id, 0);
        assert_eq!(op.timestamp_ns, 0);
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_positional_kinds_require_position() {
        let mut op = Operation::insert("a.txt", 1, 1, "x", "inst-a");
        op.line = 0;
        assert_eq!(op.validate(), Err(OperationError::MissingPosition(OpKind::Insert)));
    }

    #[test]
    fn test_meta_change_rejects_position() {
        let mut op = Operation::meta_change("a.txt", "k=v", "inst-a");
        op.column = 3;
        assert_eq!(
            op.validate(),
            Err(OperationError::UnexpectedPosition(OpKind::MetaChange))
        );
    }

    #[test]
    fn test_length_invariant_checked() {
        let mut op = Operation::insert("a.txt", 1, 1, "abc", "inst-a");
        op.content_length = 7;
        assert_eq!(
            op.validate(),
            Err(OperationError::LengthMismatch { recorded: 7, actual: 3 })
        );
    }

    #[test]
    fn test_replace_requires_pre_image() {
        let mut op = Operation::replace("a.txt", 2, 4, "new", "old", "inst-a");
        assert!(op.validate().is_ok());
        op.replaced = None;
        assert_eq!(op.validate(), Err(OperationError::MissingPreImage));
    }

    #[test]
    fn test_delete_requires_content() {
        let op = Operation::delete("a.txt", 1, 1, "", "inst-a");
        assert_eq!(op.validate(), Err(OperationError::MissingContent));
    }

    #[test]
    fn test_insert_reverses_to_delete() {
        let op = Operation::insert("a.txt", 3, 9, "hi", "inst-a");
        let rev = op.reversal("inst-b");
        assert_eq!(rev.kind, OpKind::Delete);
        assert_eq!(rev.file_path, "a.txt");
        assert_eq!((rev.line, rev.column), (3, 9));
        assert_eq!(rev.content, b"hi");
        assert_eq!(rev.origin, "inst-b");
        assert_eq!(rev.operation_id, 0);
        assert!(rev.validate().is_ok());
    }

    #[test]
    fn test_delete_reverses_to_insert() {
        let op = Operation::delete("f.txt", 1, 1, "hi", "inst-a");
        let rev = op.reversal("inst-a");
        assert_eq!(rev.kind, OpKind::Insert);
        assert_eq!(rev.content, b"hi");
        assert_eq!((rev.line, rev.column), (1, 1));
    }

    #[test]
    fn test_replace_reversal_swaps_pre_image() {
        let op = Operation::replace("a.txt", 2, 2, "new", "old", "inst-a");
        let rev = op.reversal("inst-a");
        assert_eq!(rev.kind, OpKind::Replace);
        assert_eq!(rev.content, b"old");
        assert_eq!(rev.replaced.as_deref(), Some(b"new".as_slice()));
        // Reversing again restores the original payloads.
        let back = rev.reversal("inst-a");
        assert_eq!(back.content, b"new");
        assert_eq!(back.replaced.as_deref(), Some(b"old".as_slice()));
    }

    #[test]
    fn test_meta_change_reversal_without_pre_image() {
        let op = Operation::meta_change("proj.toml", "v2", "inst-a");
        let rev = op.reversal("inst-a");
        assert_eq!(rev.kind, OpKind::MetaChange);
        assert!(rev.content.is_empty());
        assert_eq!(rev.replaced.as_deref(), Some(b"v2".as_slice()));
    }

    #[test]
    fn test_wire_round_trip() {
        let op = Operation::replace("src/main.rs", 10, 5, "bar()", "foo()", "inst-a");
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
