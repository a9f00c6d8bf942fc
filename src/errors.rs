use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

#[derive(Debug)]
pub enum CanopyError {
    /// The leaf set of the tree and the sequence names in the alignment disagree
    InputMismatch(String),

    /// A model or tree parameter is out of its valid range
    InvalidParameter(String),

    /// An alignment row contains a character outside the model alphabet
    UnknownSymbol { symbol: char, node: usize },

    /// A CIGAR string could not be parsed
    MalformedCigar(String),

    /// The edit operations of a cigar tree are mutually inconsistent
    InconsistentHistory(String),

    /// A Newick tree string could not be parsed
    NewickFormat(String),

    /// A model file was syntactically valid JSON but semantically malformed
    ModelFormat(String),

    /// Error variant when we couldn't read from a file
    FileRead { source: io::Error },

    /// Error variant when we could not serialize a cigar tree to binary representation
    Serialization { source: bincode::Error },

    /// Error variant for malformed JSON input or output
    Json { source: serde_json::Error },

    /// Other IO errors
    IO(io::Error),

    /// Other miscellaneous canopy errors
    Other,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CanopyError>;

impl Error for CanopyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            Self::FileRead { ref source } => Some(source),
            Self::Serialization { ref source } => Some(source),
            Self::Json { ref source } => Some(source),
            Self::IO(ref source) => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for CanopyError {
    fn from(value: io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<bincode::Error> for CanopyError {
    fn from(value: bincode::Error) -> Self {
        Self::Serialization { source: value }
    }
}

impl From<serde_json::Error> for CanopyError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json { source: value }
    }
}

impl Display for CanopyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::InputMismatch(ref msg) =>
                write!(f, "Tree and alignment do not match: {msg}"),
            Self::InvalidParameter(ref msg) =>
                write!(f, "Invalid parameter: {msg}"),
            Self::UnknownSymbol { symbol, node } =>
                write!(f, "Character {symbol:?} at node {node} is not part of the model alphabet!"),
            Self::MalformedCigar(ref msg) =>
                write!(f, "Malformed CIGAR: {msg}"),
            Self::InconsistentHistory(ref msg) =>
                write!(f, "Inconsistent cigar tree: {msg}"),
            Self::NewickFormat(ref msg) =>
                write!(f, "Could not parse Newick tree: {msg}"),
            Self::ModelFormat(ref msg) =>
                write!(f, "Malformed model file: {msg}"),
            Self::FileRead { source: _ } =>
                write!(f, "Could not read from file!"),
            Self::Serialization { source: _ } =>
                write!(f, "Could not serialize the cigar tree to file!"),
            Self::Json { ref source } =>
                write!(f, "JSON error: {source}"),
            Self::IO(ref err) =>
                err.fmt(f),
            Self::Other =>
                write!(f, "Canopy error!"),
        }
    }
}
