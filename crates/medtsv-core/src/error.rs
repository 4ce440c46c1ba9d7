//! Error type for processing a fetched target

/// Error from streaming one validated archive through the pipeline.
///
/// `Decode` covers the input side (decompression, tokenizing) and only
/// fails the target being processed. `Sink` means the output side is gone
/// (unwritable destination, full disk, writer thread died) and ends the run.
#[derive(Debug)]
pub enum StageError {
    Decode(std::io::Error),
    Sink(std::io::Error),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Sink(e) => write!(f, "output: {e}"),
        }
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) | Self::Sink(e) => Some(e),
        }
    }
}

impl StageError {
    /// Whether the whole run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Sink(_))
    }
}
