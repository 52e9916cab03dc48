//! Declare an error type for proxy_rules
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// An error that occurs while loading proxy rules.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A rule file couldn't be read.
    #[error("Couldn't read rule file {path:?}")]
    Io {
        /// The file we tried to read.
        path: PathBuf,
        /// What went wrong.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A rule wasn't a valid regular expression.
    #[error("Invalid rule {rule:?}")]
    BadRegex {
        /// The offending rule text.
        rule: String,
        /// What the regex compiler said.
        #[source]
        source: regex::Error,
    },
}

impl Error {
    /// Wrap an I/O error from reading `path`.
    pub(crate) fn from_io(path: &Path, e: std::io::Error) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source: Arc::new(e),
        }
    }

    /// Return true if this error means the rule file doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
