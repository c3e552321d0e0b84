// Copyright 2026 loadguard Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    backtrace::Backtrace,
    fmt::{Debug, Display},
    sync::Arc,
    time::Duration,
};

/// ErrorKind is all kinds of Error of loadguard.
///
/// Lock timeouts on the read path never become errors. They show up as a refused put instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A write could not invalidate the pending puts of a key or region in time.
    ///
    /// The write must be aborted, caching its data could leave stale entries behind.
    InvalidationFailed,
    /// Error raised by the underlying store.
    Store,
    /// Error raised by the cluster broadcaster.
    Broadcast,
    /// Config error.
    Config,
    /// Message encode or decode error.
    Codec,
    /// A transaction synchronization failed.
    Transaction,
    /// External error.
    External,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::InvalidationFailed => "Invalidation failed",
            ErrorKind::Store => "Store error",
            ErrorKind::Broadcast => "Broadcast error",
            ErrorKind::Config => "Config error",
            ErrorKind::Codec => "Codec error",
            ErrorKind::Transaction => "Transaction error",
            ErrorKind::External => "External error",
        }
    }
}

/// Error is the error struct returned by all loadguard functions.
///
/// ## Display
///
/// - Via `Display`, the error is printed in a single line:
///
/// ```shell
/// Invalidation failed, context: { key: 42, timeout: 60s } => cannot lock pending puts of key
/// ```
///
/// - Via `Debug`, the error is printed in multiple lines with context, source and backtrace (if captured).
///
/// - Via `{:#?}`, the error is printed as a conventional struct.
pub struct Error {
    kind: ErrorKind,
    message: String,

    context: Vec<(&'static str, String)>,

    source: Option<Arc<anyhow::Error>>,
    backtrace: Option<Arc<Backtrace>>,
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // If alternate has been specified, we will print like Debug.
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("source", &self.source);
            de.field("backtrace", &self.backtrace);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "  {}: {}", k, v)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source:")?;
            writeln!(f, "  {source:#}")?;
        }

        if let Some(backtrace) = &self.backtrace {
            writeln!(f)?;
            writeln!(f, "Backtrace:")?;
            writeln!(f, "{backtrace}")?;
        }

        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            let mut iter = self.context.iter().peekable();
            while let Some((k, v)) = iter.next() {
                write!(f, "{}: {}", k, v)?;
                if iter.peek().is_some() {
                    write!(f, ", ")?;
                }
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref().as_ref())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            source: self.source.clone(),
            backtrace: self.backtrace.clone(),
        }
    }
}

impl Error {
    /// Create a new error.
    ///
    /// If the error needs to carry a source error, please use `with_source` method.
    ///
    /// ```rust
    /// # use loadguard_common::error::{Error, ErrorKind};
    /// let io_error = std::io::Error::other("connection reset");
    /// Error::new(ErrorKind::Store, "remote store is unreachable").with_source(io_error);
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            source: None,
            backtrace: Some(Arc::new(Backtrace::capture())),
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set source for error.
    ///
    /// # Notes
    ///
    /// If the source has been set, we will raise a panic here.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(Arc::new(source.into()));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error context.
    pub fn context(&self) -> &Vec<(&'static str, String)> {
        &self.context
    }

    /// Get the error backtrace.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }

    /// Get the error source.
    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }

    /// Downcast the reference of the source error to a specific error type reference.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Result type for loadguard.
pub type Result<T> = std::result::Result<T, Error>;

/// Helper methods for Error.
impl Error {
    /// Helper for creating an [`ErrorKind::InvalidationFailed`] error for a single key.
    pub fn invalidation_failed(key: impl Debug, timeout: Duration) -> Self {
        Error::new(ErrorKind::InvalidationFailed, "cannot lock pending puts of key")
            .with_context("key", format!("{key:?}"))
            .with_context("timeout", format!("{timeout:?}"))
    }

    /// Helper for creating an [`ErrorKind::InvalidationFailed`] error for a whole region.
    pub fn region_invalidation_failed(region: &str, timeout: Duration) -> Self {
        Error::new(ErrorKind::InvalidationFailed, "cannot lock pending puts of every key in region")
            .with_context("region", region)
            .with_context("timeout", format!("{timeout:?}"))
    }

    /// Helper for creating an [`ErrorKind::Store`] error with the store failure as the source.
    pub fn store(source: impl Into<anyhow::Error>) -> Self {
        Error::new(ErrorKind::Store, "store operation failed").with_source(source)
    }

    /// Helper for creating an [`ErrorKind::Broadcast`] error with the transport failure as the source.
    pub fn broadcast(source: impl Into<anyhow::Error>) -> Self {
        Error::new(ErrorKind::Broadcast, "broadcast failed").with_source(source)
    }

    /// Helper for creating an [`ErrorKind::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Config, message)
    }

    /// Helper for creating an error from [`bincode::Error`].
    pub fn bincode_error(source: bincode::Error) -> Self {
        Error::new(ErrorKind::Codec, "coding error").with_source(source)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Self::bincode_error(e)
    }
}
