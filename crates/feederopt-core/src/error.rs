//! Unified error types for the feederopt workspace
//!
//! [`FeederError`] covers every structural input error the core can detect:
//! duplicate names, dangling references, inconsistent bounds, cycles that no
//! switch can break and buses that no provider can reach. Every variant names
//! the offending entity, since networks are frequently generated and carry
//! hundreds of elements.
//!
//! Solver non-convergence is *not* an error; see the flow status types in
//! `feederopt-algo`.
//!
//! # Example
//!
//! ```ignore
//! use feederopt_core::{FeederError, FeederResult};
//!
//! fn load(path: &str) -> FeederResult<Network> {
//!     let doc: NetworkDocument = serde_json::from_str(&std::fs::read_to_string(path)?)?;
//!     doc.build()
//! }
//! ```

use thiserror::Error;

/// Unified error type for all core operations.
#[derive(Error, Debug)]
pub enum FeederError {
    /// I/O errors (file access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Two elements of the same kind share a name
    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    /// A reference to a bus that does not exist
    #[error("Unknown bus '{0}'")]
    UnknownBus(String),

    /// A reference to a line that does not exist
    #[error("Unknown line '{0}'")]
    UnknownLine(String),

    /// An attribute value that violates a construction rule
    #[error("Invalid parameter on {entity}: {rule}")]
    InvalidParameter { entity: String, rule: String },

    /// A cycle of closed lines with no switchable line to open
    #[error("Cycle cannot be broken, no switchable line among: {}", .lines.join(", "))]
    UnbreakableCycle { lines: Vec<String> },

    /// A bus that cannot be connected to any provider
    #[error("Bus '{0}' cannot be connected to any provider")]
    UnreachableBus(String),

    /// A transformer that cannot carry radial flow in any reachable configuration
    #[error("No valid mode to connect terminal '{terminal}' of transformer '{transformer}'")]
    MissingTransformerMode {
        transformer: String,
        terminal: String,
    },

    /// A switch configuration that does not match the network
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using FeederError.
pub type FeederResult<T> = Result<T, FeederError>;

impl FeederError {
    /// Shorthand for [`FeederError::InvalidParameter`].
    pub fn invalid(entity: impl Into<String>, rule: impl Into<String>) -> Self {
        FeederError::InvalidParameter {
            entity: entity.into(),
            rule: rule.into(),
        }
    }
}

impl From<anyhow::Error> for FeederError {
    fn from(err: anyhow::Error) -> Self {
        FeederError::Other(err.to_string())
    }
}

impl From<String> for FeederError {
    fn from(s: String) -> Self {
        FeederError::Other(s)
    }
}

impl From<&str> for FeederError {
    fn from(s: &str) -> Self {
        FeederError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for FeederError {
    fn from(err: serde_json::Error) -> Self {
        FeederError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_entity() {
        let err = FeederError::DuplicateName {
            kind: "line",
            name: "L7".into(),
        };
        assert_eq!(err.to_string(), "Duplicate line name 'L7'");

        let err = FeederError::UnbreakableCycle {
            lines: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FeederError = io_err.into();
        assert!(matches!(err, FeederError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> FeederResult<()> {
            Err(FeederError::invalid("bus 'b1'", "v_min exceeds v_max"))
        }

        fn outer() -> FeederResult<()> {
            inner()?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert!(err.to_string().contains("bus 'b1'"));
    }
}
