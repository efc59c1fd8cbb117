use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required credentials or settings are missing or invalid.
    Configuration,
    /// Connection, timeout, DNS or malformed-response failure below HTTP.
    Transport,
    /// The server answered, but not with a usable payload.
    Application,
    /// Writing fetched files to disk failed.
    Materialization,
    /// The downstream application failed after handoff.
    EntryPoint,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transport => "transport",
            ErrorKind::Application => "application",
            ErrorKind::Materialization => "materialization",
            ErrorKind::EntryPoint => "entry-point",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn configuration<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Configuration, msg)
    }

    pub fn transport<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Transport, msg)
    }

    pub fn application<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Application, msg)
    }

    pub fn materialization<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Materialization, msg)
    }

    pub fn entry_point<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::EntryPoint, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Re-wraps the message with a prefix, keeping the kind.
    pub fn context<C: fmt::Display>(self, ctx: C) -> Self {
        Self {
            kind: self.kind,
            msg: format!("{ctx}: {}", self.msg),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::application(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
