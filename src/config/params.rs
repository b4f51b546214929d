use std::ffi::OsString;
use std::fmt;

use crate::config::error::{ErrorConfig, Result};

/// Where to connect and what to consume. Built once at startup and never changed.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub connection_string: String,
    pub queue_name: String,
}

impl ConnectionParams {
    pub fn new(connection_string: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            queue_name: queue_name.into(),
        }
    }

    /// Build from positional arguments, program name already stripped.
    ///
    /// Exactly two arguments are required. They are taken verbatim: no trimming,
    /// no validation of the connection string format. The count is checked before
    /// the encoding, so a wrong count is always a usage error.
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let [connection_string, queue_name] = <[OsString; 2]>::try_from(args)
            .map_err(|args| ErrorConfig::Usage { given: args.len() })?;

        Ok(Self {
            connection_string: utf8(connection_string, 1)?,
            queue_name: utf8(queue_name, 2)?,
        })
    }
}

fn utf8(arg: OsString, position: usize) -> Result<String> {
    arg.into_string()
        .map_err(|_| ErrorConfig::NotUnicode { position })
}

// The connection string usually embeds credentials, keep it out of the logs.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("connection_string", &"<redacted>")
            .field("queue_name", &self.queue_name)
            .finish()
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue '{}' (connection string redacted)", self.queue_name)
    }
}
