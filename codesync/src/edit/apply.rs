//! Applying ordered line edits to a text.

use thiserror::Error;

use crate::error::SyncError;
use crate::models::{EditKind, EditOperation};

/// A batch stopped at an operation kind the engine does not support.
///
/// Every operation before `position` has already taken effect on `text`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported edit operation {kind:?} at position {position}")]
pub struct PartialEdit {
    /// Text with the applied prefix of the batch in effect.
    pub text: String,
    /// Index of the rejected operation within the batch.
    pub position: usize,
    /// Kind string of the rejected operation.
    pub kind: String,
}

impl From<PartialEdit> for SyncError {
    fn from(partial: PartialEdit) -> Self {
        Self::UnsupportedOperation {
            kind: partial.kind,
            position: partial.position,
        }
    }
}

/// Apply `ops` in order to `original`.
///
/// The text is split on `'\n'` and rejoined with `'\n'`, so a trailing
/// newline shows up as a final empty line and survives unchanged. Each
/// operation's index is read against the line sequence as mutated by the
/// operations before it. Out-of-range updates and deletes are ignored; an
/// insert past the end appends.
pub fn apply(original: &str, ops: &[EditOperation]) -> Result<String, PartialEdit> {
    if ops.is_empty() {
        return Ok(original.to_string());
    }

    let mut lines: Vec<String> = original.split('\n').map(String::from).collect();

    for (position, op) in ops.iter().enumerate() {
        let index = op.line_index;
        match &op.kind {
            EditKind::Insert => {
                let at = index.min(lines.len());
                lines.insert(at, op.value.clone());
            }
            EditKind::Update => {
                if let Some(line) = lines.get_mut(index) {
                    line.clone_from(&op.value);
                }
            }
            EditKind::Delete => {
                if index < lines.len() {
                    lines.remove(index);
                }
            }
            EditKind::Other(kind) => {
                return Err(PartialEdit {
                    text: lines.join("\n"),
                    position,
                    kind: kind.clone(),
                });
            }
        }
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_vec(text: &str) -> Vec<&str> {
        text.split('\n').collect()
    }

    const SAMPLES: &[&str] = &["", "one", "a\nb\nc", "a\nb\n", "\n\n", "x\r\ny"];

    #[test]
    fn test_empty_batch_is_identity() {
        for text in SAMPLES {
            assert_eq!(apply(text, &[]).unwrap(), *text);
        }
    }

    #[test]
    fn test_update_replaces_exactly_one_line() {
        for text in SAMPLES {
            let before = line_vec(text);
            for i in 0..before.len() {
                let after_text = apply(text, &[EditOperation::update(i, "NEW")]).unwrap();
                let after = line_vec(&after_text);
                assert_eq!(after.len(), before.len());
                for (j, line) in after.iter().enumerate() {
                    if j == i {
                        assert_eq!(*line, "NEW");
                    } else {
                        assert_eq!(*line, before[j]);
                    }
                }
            }
        }
    }

    #[test]
    fn test_delete_removes_exactly_one_line() {
        for text in SAMPLES {
            let before = line_vec(text);
            for i in 0..before.len() {
                let after_text = apply(text, &[EditOperation::delete(i)]).unwrap();
                let mut expected = before.clone();
                expected.remove(i);
                if expected.is_empty() {
                    // Joining zero lines gives "", which reads back as one empty line.
                    assert_eq!(after_text, "");
                } else {
                    assert_eq!(line_vec(&after_text), expected);
                }
            }
        }
    }

    #[test]
    fn test_insert_shifts_following_lines() {
        for text in SAMPLES {
            let before = line_vec(text);
            for i in 0..=before.len() {
                let after_text = apply(text, &[EditOperation::insert(i, "INS")]).unwrap();
                let after = line_vec(&after_text);
                assert_eq!(after.len(), before.len() + 1);
                assert_eq!(after[i], "INS");
                assert_eq!(&after[..i], &before[..i]);
                assert_eq!(&after[i + 1..], &before[i..]);
            }
        }
    }

    #[test]
    fn test_indices_follow_mutated_sequence() {
        let ops = [EditOperation::insert(0, "X"), EditOperation::update(1, "Y")];
        // After the insert, line 1 is the original "A".
        assert_eq!(apply("A\nB", &ops).unwrap(), "X\nY\nB");

        let ops = [EditOperation::delete(0), EditOperation::delete(0)];
        assert_eq!(apply("A\nB\nC", &ops).unwrap(), "C");
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let text = "a\nb";
        assert_eq!(apply(text, &[EditOperation::update(2, "z")]).unwrap(), text);
        assert_eq!(apply(text, &[EditOperation::delete(7)]).unwrap(), text);
        assert_eq!(
            apply(text, &[EditOperation::insert(9, "z")]).unwrap(),
            "a\nb\nz"
        );
    }

    #[test]
    fn test_unknown_kind_keeps_applied_prefix() {
        let ops = [
            EditOperation::update(0, "first"),
            EditOperation {
                kind: EditKind::Other("swap".to_string()),
                line_index: 0,
                value: String::new(),
            },
            EditOperation::update(1, "never"),
        ];
        let partial = apply("a\nb", &ops).unwrap_err();
        assert_eq!(partial.text, "first\nb");
        assert_eq!(partial.position, 1);
        assert_eq!(partial.kind, "swap");

        let err: SyncError = partial.into();
        assert!(matches!(err, SyncError::UnsupportedOperation { position: 1, .. }));
    }

    #[test]
    fn test_no_line_ending_normalization() {
        let text = "a\r\nb  \n";
        let out = apply(text, &[EditOperation::update(1, "B  ")]).unwrap();
        assert_eq!(out, "a\r\nB  \n");
    }
}
