use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::panic::Location;

/// The error taxonomy of spec §7: every failure mode a decoder can report
/// is one of these, and callers branch on `kind()` rather than string content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Invalid header field, incomplete/over-subscribed prefix tree,
    /// degenerate-tree misuse, failed CRC, non-zero padding, over-long run.
    Corrupted,
    /// Source ended in the middle of an expected field or symbol.
    UnexpectedEof,
    /// BZip2 bzip1 magic or a randomized-block flag.
    Deprecated,
    /// Encoder-side refusal (XFLATE payload too large or shape unsupported).
    Invalid,
    /// A raw byte read was requested with fractional bits still pending.
    Unaligned,
    /// Operation on a session that was already closed.
    Closed,
    /// Contract violation that indicates a bug (e.g. an empty prefix tree consulted).
    Internal,
}

impl Display for StreamErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: Option<String>,
    pub context: Option<String>,
    pub source: Option<Box<dyn Error + Send + Sync>>,
    pub location: &'static Location<'static>,
}

pub type Res<T> = Result<T, StreamError>;

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as _)
    }
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.kind, self.location)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?
        }
        if let Some(cause) = &self.source {
            write!(f, "\ncaused by {}", cause)?
        }
        Ok(())
    }
}

impl From<StreamError> for std::io::Error {
    fn from(value: StreamError) -> Self {
        let kind = match value.kind {
            StreamErrorKind::UnexpectedEof => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, value)
    }
}

impl From<ErrorBuilder> for StreamError {
    #[track_caller]
    fn from(
        ErrorBuilder {
            kind,
            message,
            context,
            source,
        }: ErrorBuilder,
    ) -> Self {
        Self {
            kind,
            message,
            context,
            source,
            location: Location::caller(),
        }
    }
}

/// Accumulates error detail before a `#[track_caller]` location is known;
/// converted into a `StreamError` at the point it escapes a parser.
#[derive(Debug)]
pub struct ErrorBuilder {
    pub kind: StreamErrorKind,
    pub message: Option<String>,
    pub context: Option<String>,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl Default for ErrorBuilder {
    fn default() -> Self {
        ErrorBuilder {
            kind: StreamErrorKind::Corrupted,
            message: None,
            context: None,
            source: None,
        }
    }
}

impl ErrorBuilder {
    pub fn kind(kind: StreamErrorKind) -> Self {
        ErrorBuilder {
            kind,
            ..Default::default()
        }
    }
}

pub trait ResultBuilder<T>: Sized {
    fn message<F: FnOnce(Option<&str>) -> String>(self, msg: F) -> Result<T, ErrorBuilder>;
    fn msg_of<M: Debug>(self, msg: &M) -> Result<T, ErrorBuilder> {
        self.message(|_| format!("{:?}", msg))
    }
}

impl<T> ResultBuilder<T> for Result<T, ErrorBuilder> {
    fn message<F: FnOnce(Option<&str>) -> String>(self, msg: F) -> Self {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(ErrorBuilder {
                message: Some(msg(e.message.as_deref())),
                ..e
            }),
        }
    }
}

impl<T> ResultBuilder<T> for Option<T> {
    fn message<F: FnOnce(Option<&str>) -> String>(self, msg: F) -> Result<T, ErrorBuilder> {
        match self {
            Some(v) => Ok(v),
            None => Err(ErrorBuilder {
                message: Some(msg(None)),
                ..ErrorBuilder::kind(StreamErrorKind::Corrupted)
            }),
        }
    }
}

/// Bridges a foreign `Result<T, E>` (I/O errors, etc.) into the builder chain,
/// tagging the eventual error with `context`'s description.
pub trait WithContext<T, E: Error, C: ErrorContext> {
    fn at(self, context: &C) -> Result<T, ErrorBuilder>;
    fn eof_at(self, context: &C) -> Result<T, ErrorBuilder>;
}

impl<T, E: Error + 'static + Send + Sync, C: ErrorContext> WithContext<T, E, C> for Result<T, E> {
    fn at(self, context: &C) -> Result<T, ErrorBuilder> {
        self.map_err(|e| ErrorBuilder {
            context: context.describe(),
            source: Some(Box::new(e)),
            ..ErrorBuilder::kind(StreamErrorKind::Corrupted)
        })
    }

    fn eof_at(self, context: &C) -> Result<T, ErrorBuilder> {
        self.map_err(|e| ErrorBuilder {
            context: context.describe(),
            source: Some(Box::new(e)),
            ..ErrorBuilder::kind(StreamErrorKind::UnexpectedEof)
        })
    }
}

/// Implemented by every parser-ish type so `raise`/`assert*` calls read as a
/// scoped "unwind" (spec §9) without an actual language-level unwind.
///
/// These all return `Res<T>` directly (not `Result<T, ErrorBuilder>`) so a
/// call reading `self.raise(...)` or `self.corrupted(...)` type-checks in
/// tail position against any function returning `Res<T>`, with no `?`
/// needed and no generic inference puzzle for the reader to untangle.
pub trait ErrorContext {
    fn describe(&self) -> Option<String> {
        None
    }

    #[track_caller]
    fn raise<T>(&self, kind: StreamErrorKind, msg: String) -> Res<T> {
        Err(ErrorBuilder {
            message: Some(msg),
            context: self.describe(),
            ..ErrorBuilder::kind(kind)
        }
        .into())
    }

    #[track_caller]
    fn corrupted<T>(&self, msg: impl Into<String>) -> Res<T> {
        self.raise(StreamErrorKind::Corrupted, msg.into())
    }

    #[track_caller]
    fn assert(&self, v: bool, msg: &str) -> Res<()> {
        if v {
            Ok(())
        } else {
            self.corrupted(msg)
        }
    }

    #[track_caller]
    fn assert_le<T: PartialOrd + Display>(&self, l: T, r: T) -> Res<()> {
        if l <= r {
            Ok(())
        } else {
            self.corrupted(format!("expected {} <= {}", l, r))
        }
    }

    #[track_caller]
    fn assert_eq<T: PartialEq + Display>(&self, l: T, r: T) -> Res<()> {
        if l == r {
            Ok(())
        } else {
            self.corrupted(format!("expected {} == {}", l, r))
        }
    }
}

/// Session poisoning (spec §7): the first structural error a decoder's
/// `read` sees is latched here and replayed verbatim on every later call,
/// until `close()` overwrites it with `Closed`.
#[derive(Default)]
pub struct Poison {
    latched: Option<(StreamErrorKind, String)>,
}

impl Poison {
    /// `Err` if the session is already poisoned or closed; the message is
    /// reconstructed (not the original `source` chain) since the original
    /// error is consumed the first time it is reported.
    pub fn check(&self) -> std::io::Result<()> {
        match &self.latched {
            None => Ok(()),
            Some((kind, msg)) => Err(std::io::Error::new(
                if *kind == StreamErrorKind::UnexpectedEof {
                    std::io::ErrorKind::UnexpectedEof
                } else {
                    std::io::ErrorKind::InvalidData
                },
                msg.clone(),
            )),
        }
    }

    /// Latches `e` (unless already poisoned/closed) and returns it as an
    /// `io::Error` for the caller's `read` to return this one time.
    pub fn record(&mut self, e: StreamError) -> std::io::Error {
        let message = e.to_string();
        if self.latched.is_none() {
            self.latched = Some((e.kind, message));
        }
        e.into()
    }

    pub fn close(&mut self) {
        self.latched = Some((StreamErrorKind::Closed, "session closed".into()));
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.latched, Some((StreamErrorKind::Closed, _)))
    }
}
