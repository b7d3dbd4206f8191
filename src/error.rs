use std::{
    error::Error,
    fmt::{self, Display},
};

use facet_core::Shape;
use facet_reflect::ReflectError;

/// Error type for aliased YAML deserialization.
#[derive(Debug)]
pub struct AliasError {
    kind: AliasErrorKind,
    location: Option<Location>,
}

impl AliasError {
    /// Returns a reference to the error kind for detailed error inspection.
    pub fn kind(&self) -> &AliasErrorKind {
        &self.kind
    }

    /// Where in the input the error was detected, if it came from the input.
    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub(crate) fn at(mut self, location: Location) -> Self {
        self.location.get_or_insert(location);
        self
    }
}

impl Display for AliasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = &self.kind;
        match self.location {
            Some(location) => write!(f, "{kind} at {location}"),
            None => write!(f, "{kind}"),
        }
    }
}

impl Error for AliasError {}

impl<K: Into<AliasErrorKind>> From<K> for AliasError {
    fn from(value: K) -> Self {
        let kind = value.into();
        AliasError {
            kind,
            location: None,
        }
    }
}

/// A 1-based line/column position in the YAML input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Line number, starting at 1.
    pub line: usize,
    /// Column number, starting at 1.
    pub column: usize,
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Detailed classification of decode errors.
#[derive(Debug)]
#[non_exhaustive]
pub enum AliasErrorKind {
    /// The destination type is not a struct, so it has no fields to alias.
    NotAStruct(&'static Shape),
    /// Failed to parse the YAML document.
    Parse(String),
    /// Error from the reflection system during deserialization.
    Reflect(ReflectError),
    /// A key matched neither a field nor any of its aliases.
    UnknownField {
        /// The unknown key.
        key: String,
        /// Every key the target would have accepted.
        expected: Vec<String>,
    },
    /// The same key appeared twice in one mapping (strict mode only).
    DuplicateKey(String),
    /// A nested struct field was absent and its type has no default.
    MissingField(&'static str),
    /// The YAML structure did not match what the target shape needs.
    UnexpectedEvent {
        /// Description of the event that was found.
        got: String,
        /// What the decoder was looking for.
        expected: &'static str,
    },
    /// The event stream ended early.
    UnexpectedEof {
        /// What the decoder was looking for.
        expected: &'static str,
    },
    /// A scalar could not be coerced into the target type.
    InvalidValue(String),
    /// A number does not fit in the target integer type.
    NumberOutOfRange {
        /// The scalar as written.
        value: String,
        /// The target type name.
        target_type: &'static str,
    },
    /// No enum variant has this name.
    UnknownVariant(String),
    /// A YAML alias (`*name`) refers to an anchor that was never defined.
    UnknownAnchor(usize),
    /// Replaying aliases would grow the document past `limit` events.
    ExcessiveAliasing {
        /// Largest event count the document was allowed to expand to.
        limit: usize,
    },
    /// Encountered an unsupported shape during deserialization.
    UnsupportedShape(String),
}

impl Display for AliasErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliasErrorKind::NotAStruct(shape) => {
                write!(f, "cannot alias fields of {shape}: not a struct")
            }
            AliasErrorKind::Parse(msg) => write!(f, "{msg}"),
            AliasErrorKind::Reflect(reflect_error) => write!(f, "{reflect_error}"),
            AliasErrorKind::UnknownField { key, expected } => {
                write!(
                    f,
                    "unknown field '{}', expected one of: {}",
                    key,
                    expected.join(", ")
                )
            }
            AliasErrorKind::DuplicateKey(key) => write!(f, "duplicate key '{key}'"),
            AliasErrorKind::MissingField(name) => {
                write!(f, "missing field '{name}' with no default value")
            }
            AliasErrorKind::UnexpectedEvent { got, expected } => {
                write!(f, "expected {expected}, found {got}")
            }
            AliasErrorKind::UnexpectedEof { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            AliasErrorKind::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            AliasErrorKind::NumberOutOfRange { value, target_type } => {
                write!(f, "number {value} is out of range for {target_type}")
            }
            AliasErrorKind::UnknownVariant(name) => write!(f, "unknown variant '{name}'"),
            AliasErrorKind::ExcessiveAliasing { limit } => {
                write!(f, "document contains excessive aliasing (over {limit} events)")
            }
            AliasErrorKind::UnknownAnchor(id) => write!(f, "alias to unknown anchor #{id}"),
            AliasErrorKind::UnsupportedShape(msg) => write!(f, "unsupported shape: {msg}"),
        }
    }
}

impl From<ReflectError> for AliasErrorKind {
    fn from(value: ReflectError) -> Self {
        Self::Reflect(value)
    }
}
