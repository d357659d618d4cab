use std::fmt;

#[derive(Debug)]
pub enum GraphicsError {
    BackendNotFound(String),

    VersionMismatch { expected: u32, found: u32 },

    /// The loaded backend or the active platform group does not provide
    /// the requested entry point.
    Unsupported(String),

    InvalidDescriptor(String),

    InvalidHandle(&'static str),

    /// Shader creation failed; carries the backend diagnostic text.
    ShaderCompile(String),

    ParamTypeMismatch { param: String, expected: &'static str },

    ContextViolation(String),

    MapViolation(String),

    SyncViolation(String),

    /// The resource is in use (bound as render target, holding a GDI DC,
    /// or referenced by a live duplicator) and cannot be released.
    ResourceBusy(String),

    DeviceLost,

    SourceLost,

    Timeout,

    BufferOverflow,

    WorkerDead,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphicsErrorClass {
    InvalidInput,
    Unsupported,
    Transient,
    ContractViolation,
    Fatal,
}

impl GraphicsError {
    pub fn class(&self) -> GraphicsErrorClass {
        match self {
            Self::BackendNotFound(_)
            | Self::InvalidDescriptor(_)
            | Self::InvalidHandle(_)
            | Self::ShaderCompile(_)
            | Self::ParamTypeMismatch { .. } => GraphicsErrorClass::InvalidInput,
            Self::Unsupported(_) | Self::VersionMismatch { .. } => GraphicsErrorClass::Unsupported,
            Self::DeviceLost | Self::SourceLost | Self::Timeout | Self::WorkerDead => {
                GraphicsErrorClass::Transient
            }
            Self::ContextViolation(_)
            | Self::MapViolation(_)
            | Self::SyncViolation(_)
            | Self::ResourceBusy(_) => GraphicsErrorClass::ContractViolation,
            Self::BufferOverflow | Self::Platform(_) => GraphicsErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), GraphicsErrorClass::Transient)
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self.class(), GraphicsErrorClass::ContractViolation)
    }

    /// Create a string-based copy of this error suitable for handing to
    /// another thread. The `Platform` variant keeps its formatted chain
    /// but loses the original error objects.
    pub fn to_sendable(&self) -> Self {
        match self {
            Self::BackendNotFound(s) => Self::BackendNotFound(s.clone()),
            Self::VersionMismatch { expected, found } => Self::VersionMismatch {
                expected: *expected,
                found: *found,
            },
            Self::Unsupported(s) => Self::Unsupported(s.clone()),
            Self::InvalidDescriptor(s) => Self::InvalidDescriptor(s.clone()),
            Self::InvalidHandle(kind) => Self::InvalidHandle(kind),
            Self::ShaderCompile(s) => Self::ShaderCompile(s.clone()),
            Self::ParamTypeMismatch { param, expected } => Self::ParamTypeMismatch {
                param: param.clone(),
                expected,
            },
            Self::ContextViolation(s) => Self::ContextViolation(s.clone()),
            Self::MapViolation(s) => Self::MapViolation(s.clone()),
            Self::SyncViolation(s) => Self::SyncViolation(s.clone()),
            Self::ResourceBusy(s) => Self::ResourceBusy(s.clone()),
            Self::DeviceLost => Self::DeviceLost,
            Self::SourceLost => Self::SourceLost,
            Self::Timeout => Self::Timeout,
            Self::BufferOverflow => Self::BufferOverflow,
            Self::WorkerDead => Self::WorkerDead,
            Self::Platform(inner) => Self::Platform(anyhow::anyhow!("{inner:#}")),
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendNotFound(name) => write!(f, "no graphics backend named '{name}'"),
            Self::VersionMismatch { expected, found } => write!(
                f,
                "graphics module api version {}.{} is incompatible with host {}.{}",
                found >> 24,
                (found >> 16) & 0xff,
                expected >> 24,
                (expected >> 16) & 0xff
            ),
            Self::Unsupported(what) => write!(f, "operation not supported: {what}"),
            Self::InvalidDescriptor(message) => write!(f, "invalid resource description: {message}"),
            Self::InvalidHandle(kind) => write!(f, "{kind} handle does not refer to a live resource"),
            Self::ShaderCompile(diagnostic) => write!(f, "shader compilation failed: {diagnostic}"),
            Self::ParamTypeMismatch { param, expected } => {
                write!(f, "shader parameter '{param}' expects a {expected} value")
            }
            Self::ContextViolation(message) => write!(f, "graphics context violation: {message}"),
            Self::MapViolation(message) => write!(f, "map/unmap violation: {message}"),
            Self::SyncViolation(message) => write!(f, "keyed mutex violation: {message}"),
            Self::ResourceBusy(message) => write!(f, "resource is busy: {message}"),
            Self::DeviceLost => write!(f, "graphics device was lost"),
            Self::SourceLost => write!(f, "capture source is no longer available"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::BufferOverflow => write!(f, "resource size overflow"),
            Self::WorkerDead => write!(f, "capture thread is not running"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for GraphicsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type GraphicsResult<T> = Result<T, GraphicsError>;

/// Logs a contract violation and returns it as an error value.
pub(crate) fn violation(error: GraphicsError) -> GraphicsError {
    log::warn!("{error}");
    error
}
