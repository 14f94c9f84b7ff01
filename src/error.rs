use thiserror::Error;

/// Main error type for the HDL server
#[derive(Error, Debug)]
pub enum HdlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Stream already has a publisher: {0}")]
    StreamAlreadyPublishing(String),

    #[error("Relay pull failed: {0}")]
    RelayPull(String),

    #[error("FLV error: {0}")]
    Flv(#[from] FlvError),

    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// FLV container errors
#[derive(Error, Debug)]
pub enum FlvError {
    #[error("Invalid FLV signature")]
    InvalidSignature,

    #[error("Unsupported FLV version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown tag type: {0}")]
    UnknownTagType(u8),
}

/// AMF0 codec errors
#[derive(Error, Debug)]
pub enum AmfError {
    #[error("Unexpected end of buffer")]
    UnexpectedEof,

    #[error("Unknown AMF0 marker: 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("Invalid UTF-8 in AMF0 string")]
    InvalidString,

    #[error("Object nesting too deep")]
    NestingTooDeep,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, HdlError>;
