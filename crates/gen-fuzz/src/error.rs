use std::io;

use crate::config::ConfigError;

/// Fatal engine errors. Everything here terminates the campaign; trial
/// failures and assumption violations are outcome data, not errors.
#[derive(Debug, thiserror::Error)]
pub enum GuidanceError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The harness drove the guidance contract out of order.
    #[error("guidance contract violation: {0}")]
    Contract(&'static str),
}

impl GuidanceError {
    pub fn io<C: Into<String>>(context: C, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub(crate) trait IoContext<T> {
    fn io_context<C: Into<String>>(self, context: C) -> Result<T, GuidanceError>;
}

impl<T> IoContext<T> for Result<T, io::Error> {
    fn io_context<C: Into<String>>(self, context: C) -> Result<T, GuidanceError> {
        self.map_err(|source| GuidanceError::io(context, source))
    }
}
