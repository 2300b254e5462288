use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Table,
    Column,
    Index,
    Sequence,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Table => write!(f, "table"),
            ResourceType::Column => write!(f, "column"),
            ResourceType::Index => write!(f, "index"),
            ResourceType::Sequence => write!(f, "sequence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelErrorCode {
    Validation,
    InvalidConfig,
    Encode,
    Decode,
    StaleMetadata,
    TableAlreadyExists,
    ColumnAlreadyExists,
    IndexAlreadyExists,
    SequenceAlreadyExists,
    TableNotFound,
    ColumnNotFound,
    IndexNotFound,
    SequenceNotFound,
    MutationTooLarge,
    IndexInconsistent,
    BackendFailure,
    CurrentValueUnavailable,
    SequenceOverflow,
    SessionClosed,
}

impl RelErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RelErrorCode::Validation => "validation",
            RelErrorCode::InvalidConfig => "invalid_config",
            RelErrorCode::Encode => "encode",
            RelErrorCode::Decode => "decode",
            RelErrorCode::StaleMetadata => "stale_metadata",
            RelErrorCode::TableAlreadyExists => "table_already_exists",
            RelErrorCode::ColumnAlreadyExists => "column_already_exists",
            RelErrorCode::IndexAlreadyExists => "index_already_exists",
            RelErrorCode::SequenceAlreadyExists => "sequence_already_exists",
            RelErrorCode::TableNotFound => "table_not_found",
            RelErrorCode::ColumnNotFound => "column_not_found",
            RelErrorCode::IndexNotFound => "index_not_found",
            RelErrorCode::SequenceNotFound => "sequence_not_found",
            RelErrorCode::MutationTooLarge => "mutation_too_large",
            RelErrorCode::IndexInconsistent => "index_inconsistent",
            RelErrorCode::BackendFailure => "backend_failure",
            RelErrorCode::CurrentValueUnavailable => "current_value_unavailable",
            RelErrorCode::SequenceOverflow => "sequence_overflow",
            RelErrorCode::SessionClosed => "session_closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(
        "stale metadata for table '{table}': sequence number {attempted} is not newer than {stored}"
    )]
    StaleMetadata {
        table: String,
        stored: u64,
        attempted: u64,
    },
    #[error("{resource_type} '{resource_id}' already exists")]
    AlreadyExists {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("mutation batch too large: {staged} staged changes exceeds limit of {limit}")]
    MutationTooLarge { staged: usize, limit: usize },
    #[error("index '{index}' on table '{table}' cannot be maintained: {reason}")]
    IndexInconsistent {
        table: String,
        index: String,
        reason: String,
    },
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("current value of sequence '{sequence}' requested before any increment")]
    CurrentValueUnavailable { sequence: String },
    #[error("sequence '{sequence}' overflowed")]
    SequenceOverflow { sequence: String },
    #[error("session is closed")]
    SessionClosed,
}

impl RelError {
    pub fn table_not_found(table: impl Into<String>) -> Self {
        RelError::NotFound {
            resource_type: ResourceType::Table,
            resource_id: table.into(),
        }
    }

    pub fn code(&self) -> RelErrorCode {
        match self {
            RelError::Validation(_) => RelErrorCode::Validation,
            RelError::InvalidConfig { .. } => RelErrorCode::InvalidConfig,
            RelError::Encode(_) => RelErrorCode::Encode,
            RelError::Decode(_) => RelErrorCode::Decode,
            RelError::StaleMetadata { .. } => RelErrorCode::StaleMetadata,
            RelError::AlreadyExists { resource_type, .. } => match resource_type {
                ResourceType::Table => RelErrorCode::TableAlreadyExists,
                ResourceType::Column => RelErrorCode::ColumnAlreadyExists,
                ResourceType::Index => RelErrorCode::IndexAlreadyExists,
                ResourceType::Sequence => RelErrorCode::SequenceAlreadyExists,
            },
            RelError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Table => RelErrorCode::TableNotFound,
                ResourceType::Column => RelErrorCode::ColumnNotFound,
                ResourceType::Index => RelErrorCode::IndexNotFound,
                ResourceType::Sequence => RelErrorCode::SequenceNotFound,
            },
            RelError::MutationTooLarge { .. } => RelErrorCode::MutationTooLarge,
            RelError::IndexInconsistent { .. } => RelErrorCode::IndexInconsistent,
            RelError::Backend(_) => RelErrorCode::BackendFailure,
            RelError::CurrentValueUnavailable { .. } => RelErrorCode::CurrentValueUnavailable,
            RelError::SequenceOverflow { .. } => RelErrorCode::SequenceOverflow,
            RelError::SessionClosed => RelErrorCode::SessionClosed,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
