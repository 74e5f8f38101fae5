use thiserror::Error;

/// Crate-wide result type for module operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A module with this name is already registered.
    #[error("module {name} is already registered")]
    DuplicateModule { name: String },

    /// No module with this name is registered.
    #[error("module {name} not found")]
    ModuleNotFound { name: String },

    /// The module exists but is not active for this client's config.
    #[error("module {name} is not active for this client")]
    ModuleNotActive { name: String },

    /// The module itself failed; the original cause is preserved.
    #[error("module {module} failed: {source}")]
    ExecutionFailed {
        module: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    #[must_use]
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateModule { name: name.into() }
    }

    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::ModuleNotFound { name: name.into() }
    }

    #[must_use]
    pub fn not_active(name: impl Into<String>) -> Self {
        Self::ModuleNotActive { name: name.into() }
    }
}
