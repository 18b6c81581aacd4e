/// Diagnostic returned by the codec instead of panicking or throwing.
///
/// Mirrors the design note in the spec: parsing failures are represented
/// as a result carrying a `{path, field, reason}`-shaped diagnostic
/// rather than using exceptions as a parser back-channel. Here `path` is
/// the tag name (there is no nested document to descend into).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short: need at least 2 bytes for a tag, got {0}")]
    FrameTooShort(usize),

    #[error("body for tag {tag:?} has wrong length: expected {expected}, got {got}")]
    WrongBodyLength {
        tag: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("body for tag {tag:?} exceeds the maximum struct size: {got} > {max}")]
    BodyTooLarge {
        tag: &'static str,
        got: usize,
        max: usize,
    },

    #[error("field {field} out of range in tag {tag:?}: {reason}")]
    FieldOutOfRange {
        tag: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("encoded frame would exceed the maximum UDP body of {max} bytes: {got}")]
    FrameTooLarge { got: usize, max: usize },
}
