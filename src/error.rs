use thiserror::Error;

use crate::host::UnitId;

macro_rules! configuration_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Configuration {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Configuration {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two broad classes. Configuration errors describe a request that can never
/// succeed and abort it before any code is touched. Per-unit errors (resolution, injection, swap)
/// describe a single program unit that could not be processed; the engine logs and skips them so
/// the rest of a request proceeds.
///
/// # Error Categories
///
/// ## Configuration Errors
/// - [`Error::Configuration`] - Malformed descriptor or unparseable probe fragment
/// - [`Error::UnknownProbe`] - Probe type not present in the extension registry
/// - [`Error::UnknownApiSurface`] - API surface not present in the extension registry
/// - [`Error::UnresolvedCatalogType`] - Catalog type with no loaded representative
/// - [`Error::Json`] - Description or configuration document could not be read
///
/// ## Per-Unit Errors
/// - [`Error::Resolution`] - A loaded unit could not be introspected
/// - [`Error::Injection`] - A unit's code could not be rewritten
/// - [`Error::Swap`] - The host refused a live code substitution
///
/// ## Runtime Errors
/// - [`Error::UnitNotFound`] - Lookup of a unit by name or id failed
/// - [`Error::Host`] - Generic failure reported by a host runtime
/// - [`Error::RecursionLimit`] - Maximum call depth exceeded while executing code
/// - [`Error::LockError`] - Thread synchronization failure
///
/// # Examples
///
/// ```rust
/// use livescope::{Error, prelude::*};
/// use std::sync::Arc;
///
/// let engine = Engine::attach(Arc::new(InMemoryHost::new()), EngineConfig::default())?;
/// let description = InstrumentationDescriptionBuilder::new()
///     .method_pattern(&["com.app.*"], &["NoSuchProbe"])
///     .build()?;
///
/// match engine.instrument(&description) {
///     Err(Error::UnknownProbe(name)) => eprintln!("probe {} is not registered", name),
///     Err(e) => eprintln!("request failed: {}", e),
///     Ok(request) => println!("request {} applied", request),
/// }
/// # Ok::<(), livescope::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    /// The request or one of its probes is malformed.
    ///
    /// Raised for unparseable fragment templates, invalid granularity values and descriptors
    /// that violate structural rules. The error includes the source location where the problem
    /// was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Configuration - {file}:{line}: {message}")]
    Configuration {
        /// The message to be printed for the Configuration error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A request referenced a probe type that is not registered.
    #[error("Failed loading probe - {0}")]
    UnknownProbe(String),

    /// A request referenced an API surface that is not registered.
    #[error("Unknown API surface - {0}")]
    UnknownApiSurface(String),

    /// An API-surface catalog names a type that has no loaded representative.
    ///
    /// Aborts resolution of the scope that uses the catalog.
    #[error("API surface '{surface}' references type '{type_name}' which is not loaded")]
    UnresolvedCatalogType {
        /// Name of the API surface
        surface: String,
        /// The catalog type that could not be resolved
        type_name: String,
    },

    /// JSON (de)serialization of a description or configuration failed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    // Per-Unit Errors
    /// A single loaded unit could not be introspected.
    ///
    /// Caught per unit during scope resolution, logged and excluded from the results.
    #[error("Failed to resolve unit '{unit}' - {message}")]
    Resolution {
        /// Qualified name of the unit
        unit: String,
        /// What went wrong
        message: String,
    },

    /// A single unit's code could not be rewritten.
    ///
    /// Caught per unit during injection; the unit is left unmodified.
    #[error("Failed to instrument unit '{unit}' - {message}")]
    Injection {
        /// Qualified name of the unit
        unit: String,
        /// What went wrong
        message: String,
    },

    /// The host runtime refused a live substitution.
    ///
    /// The computed representation is discarded and the unit remains in its prior state.
    #[error("Failed to redefine unit {unit} - {message}")]
    Swap {
        /// Identity of the unit
        unit: UnitId,
        /// Reason reported by the host
        message: String,
    },

    // Runtime Errors
    /// A unit lookup failed.
    #[error("Unit not found - {0}")]
    UnitNotFound(String),

    /// Generic failure reported by a host runtime implementation.
    #[error("{0}")]
    Host(String),

    /// Recursion limit reached.
    ///
    /// Executing code in the in-memory host enforces a maximum call depth. The associated
    /// value is the limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Failed to lock target.
    ///
    /// This error occurs when a mutex or rwlock guarding engine state has been poisoned.
    #[error("Failed to lock target")]
    LockError,
}

impl Error {
    /// Returns `true` for errors that describe an invalid request.
    ///
    /// These abort a request before any code is modified.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. }
                | Error::UnknownProbe(_)
                | Error::UnknownApiSurface(_)
                | Error::UnresolvedCatalogType { .. }
                | Error::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_macro_captures_location() {
        let err = configuration_error!("bad fragment in {}", "ResponseTimeProbe");
        match err {
            Error::Configuration {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "bad fragment in ResponseTimeProbe");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            _ => panic!("expected configuration error"),
        }
    }

    #[test]
    fn test_is_configuration() {
        assert!(Error::UnknownProbe("X".into()).is_configuration());
        assert!(Error::UnresolvedCatalogType {
            surface: "Database API".into(),
            type_name: "sql.Statement".into()
        }
        .is_configuration());
        assert!(!Error::Injection {
            unit: "com.app.A".into(),
            message: "boom".into()
        }
        .is_configuration());
        assert!(!Error::LockError.is_configuration());
    }
}
