use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    ConfigParse,
    ConfigBuild,
    EngineInit,
    EngineStart,
    AlreadyStarted,
    Usage,
    PingTimeout,
    PingError,
    InvalidKeyLength,
    KeyGeneration,
    InvalidInput,
    Certificate,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Message and source text joined the way they travel in a response.
    pub fn detail(&self) -> String {
        match (&self.message, &self.source) {
            (Some(message), Some(source)) => format!("{message}: {source}"),
            (Some(message), None) => message.clone(),
            (None, Some(source)) => source.to_string(),
            (None, None) => format!("{:?}", self.kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

/// Stable wire code for each kind. Hosts match on these numbers.
pub fn to_response_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::ConfigParse => 1,
        ErrorKind::ConfigBuild => 2,
        ErrorKind::EngineInit => 3,
        ErrorKind::EngineStart => 4,
        ErrorKind::AlreadyStarted => 5,
        ErrorKind::Usage => 6,
        ErrorKind::PingTimeout => 100,
        ErrorKind::PingError => 101,
        ErrorKind::InvalidKeyLength => 200,
        ErrorKind::KeyGeneration => 201,
        ErrorKind::InvalidInput => 202,
        ErrorKind::Certificate => 203,
    }
}
