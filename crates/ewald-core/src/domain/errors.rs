use crate::cells::RegistryError;
use crate::comms::ReductionError;
use crate::ewald::ParameterError;
use crate::geometry::GeometryError;

pub type EwaldResult<T> = Result<T, EwaldError>;

/// Failure class of an [`EwaldError`], which fixes the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EwaldErrorCategory {
    InputValidationError,
    AllocationError,
    CommunicationError,
    InternalError,
}

impl EwaldErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InputValidationError => 2,
            Self::AllocationError => 3,
            Self::CommunicationError => 4,
            Self::InternalError => 5,
        }
    }

    /// Label printed on the final line before the process exits.
    pub const fn abort_class(self) -> &'static str {
        match self {
            Self::InputValidationError => "CONFIG_FATAL",
            Self::AllocationError => "ALLOC_FATAL",
            Self::CommunicationError => "COMM_FATAL",
            Self::InternalError => "SYS_FATAL",
        }
    }
}

/// Unrecoverable failure of the Ewald module.
///
/// Every error here is fatal for the run: the binary prints
/// [`EwaldError::diagnostic_line`] and exits with [`EwaldError::exit_code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category:?} [{placeholder}] {message}")]
pub struct EwaldError {
    category: EwaldErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl EwaldError {
    fn new(
        category: EwaldErrorCategory,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub fn input_validation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(
            EwaldErrorCategory::InputValidationError,
            placeholder,
            message,
        )
    }

    pub fn allocation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(EwaldErrorCategory::AllocationError, placeholder, message)
    }

    pub fn communication(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(EwaldErrorCategory::CommunicationError, placeholder, message)
    }

    pub fn internal(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(EwaldErrorCategory::InternalError, placeholder, message)
    }

    pub const fn category(&self) -> EwaldErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.placeholder, self.message)
    }

    pub fn fatal_exit_line(&self) -> String {
        format!(
            "FATAL {}: exit code {}",
            self.category.abort_class(),
            self.exit_code()
        )
    }
}

impl From<ParameterError> for EwaldError {
    fn from(error: ParameterError) -> Self {
        let placeholder = match &error {
            ParameterError::InvalidDipoleMoment { .. } => "EWALD.DIPOLE_MOMENT",
            ParameterError::InvalidRealCutoff { .. } => "EWALD.REAL_CUTOFF",
            ParameterError::InvalidBoxLength { .. } => "EWALD.BOX_LENGTH",
            ParameterError::TermCountOverflow { .. } => "EWALD.TERM_COUNT",
            ParameterError::Allocation { .. } => {
                return Self::allocation("EWALD.SCRATCH_BUFFER", error.to_string());
            }
        };
        Self::input_validation(placeholder, error.to_string())
    }
}

impl From<RegistryError> for EwaldError {
    fn from(error: RegistryError) -> Self {
        Self::input_validation("REGISTRY.CELLS", error.to_string())
    }
}

impl From<ReductionError> for EwaldError {
    fn from(error: ReductionError) -> Self {
        Self::communication("COMMS.REDUCTION", error.to_string())
    }
}

impl From<GeometryError> for EwaldError {
    fn from(error: GeometryError) -> Self {
        Self::input_validation("GEOMETRY.BOX", error.to_string())
    }
}
