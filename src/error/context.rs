//! Extension traits for attaching human-readable context to errors and
//! `Option`s, in the style of `anyhow::Context` but returning `BeadsError`.

use super::BeadsError;

/// Extend `Result<T, E>` with a way to attach context, turning the error
/// into a `BeadsError::WithContext`.
pub trait ResultExt<T> {
    /// Attach a static context message.
    ///
    /// # Errors
    ///
    /// Returns `BeadsError::WithContext` wrapping the original error if the
    /// result was `Err`.
    fn context(self, message: &str) -> Result<T, BeadsError>;

    /// Attach a lazily computed context message.
    ///
    /// # Errors
    ///
    /// Returns `BeadsError::WithContext` wrapping the original error if the
    /// result was `Err`.
    fn with_context<F>(self, f: F) -> Result<T, BeadsError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: &str) -> Result<T, BeadsError> {
        self.map_err(|source| BeadsError::WithContext {
            context: message.to_string(),
            source: Box::new(source),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, BeadsError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| BeadsError::WithContext {
            context: f(),
            source: Box::new(source),
        })
    }
}

/// Extend `Option<T>` with a way to turn `None` into a `BeadsError`.
pub trait OptionExt<T> {
    /// Convert `None` into the given error.
    ///
    /// # Errors
    ///
    /// Returns `err` if the option was `None`.
    fn ok_or_beads_error(self, err: BeadsError) -> Result<T, BeadsError>;

    /// Convert `None` into a `BeadsError::WithContext` carrying `message`.
    ///
    /// # Errors
    ///
    /// Returns `BeadsError::WithContext` if the option was `None`.
    fn context(self, message: &str) -> Result<T, BeadsError>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_beads_error(self, err: BeadsError) -> Result<T, BeadsError> {
        self.ok_or(err)
    }

    fn context(self, message: &str) -> Result<T, BeadsError> {
        self.ok_or_else(|| BeadsError::WithContext {
            context: message.to_string(),
            source: Box::new(std::io::Error::other(message.to_string())),
        })
    }
}
