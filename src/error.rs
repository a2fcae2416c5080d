use thiserror::Error;

/// Problems with a class definition handed to the linker, detected before any loading happens.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("invalid type descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("class {0} is already defined")]
    DuplicateClass(String),
    #[error("class {class} declares member {member} more than once")]
    DuplicateMember { class: String, member: String },
    #[error("invalid method signature {signature} for {class}.{name}")]
    InvalidSignature {
        class: String,
        name: String,
        signature: String,
    },
    #[error("class {0} declares too many members")]
    TooManyMembers(String),
    #[error("constant pool of {class} references type index {index}, but only {length} types exist")]
    PoolIndexOutOfRange {
        class: String,
        index: u32,
        length: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("class definition error: {0}")]
    Definition(#[from] DefinitionError),
    #[error("scenario raised {0}")]
    Managed(String),
    #[error("worker thread panicked")]
    WorkerPanicked,
}
