use std::fmt;
use thiserror::Error;

/// Pipeline stage that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Input,
    Segmentation,
    Isosurface,
    Simplification,
    Icp,
    Resampling,
    Pipeline,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Stage::Input => "Input",
                Stage::Segmentation => "Segmentation",
                Stage::Isosurface => "Isosurface",
                Stage::Simplification => "Simplification",
                Stage::Icp => "ICP",
                Stage::Resampling => "Resampling",
                Stage::Pipeline => "Pipeline",
            }
        )
    }
}

/// Discriminant of [`Error`], for callers that only care about the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRange,
    InvalidParameter,
    EmptyVolume,
    EmptyInput,
    DegenerateGeometry,
    SingularTransform,
}

/// Errors raised by the core stages. All of them are terminal for the stage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{stage}: {reason}")]
    InvalidRange { stage: Stage, reason: String },

    #[error("{stage}: {reason}")]
    InvalidParameter { stage: Stage, reason: String },

    #[error("{stage}: {reason}")]
    EmptyVolume { stage: Stage, reason: String },

    #[error("{stage}: {reason}")]
    EmptyInput { stage: Stage, reason: String },

    #[error("{stage}: {reason}")]
    DegenerateGeometry { stage: Stage, reason: String },

    #[error("{stage}: {reason}")]
    SingularTransform { stage: Stage, reason: String },
}

impl Error {
    pub fn invalid_range(stage: Stage, reason: impl Into<String>) -> Self {
        Error::InvalidRange {
            stage,
            reason: reason.into(),
        }
    }

    pub fn invalid_parameter(stage: Stage, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            stage,
            reason: reason.into(),
        }
    }

    pub fn empty_volume(stage: Stage, reason: impl Into<String>) -> Self {
        Error::EmptyVolume {
            stage,
            reason: reason.into(),
        }
    }

    pub fn empty_input(stage: Stage, reason: impl Into<String>) -> Self {
        Error::EmptyInput {
            stage,
            reason: reason.into(),
        }
    }

    pub fn degenerate_geometry(stage: Stage, reason: impl Into<String>) -> Self {
        Error::DegenerateGeometry {
            stage,
            reason: reason.into(),
        }
    }

    pub fn singular_transform(stage: Stage, reason: impl Into<String>) -> Self {
        Error::SingularTransform {
            stage,
            reason: reason.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Error::InvalidRange { stage, .. }
            | Error::InvalidParameter { stage, .. }
            | Error::EmptyVolume { stage, .. }
            | Error::EmptyInput { stage, .. }
            | Error::DegenerateGeometry { stage, .. }
            | Error::SingularTransform { stage, .. } => *stage,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRange { .. } => ErrorKind::InvalidRange,
            Error::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Error::EmptyVolume { .. } => ErrorKind::EmptyVolume,
            Error::EmptyInput { .. } => ErrorKind::EmptyInput,
            Error::DegenerateGeometry { .. } => ErrorKind::DegenerateGeometry,
            Error::SingularTransform { .. } => ErrorKind::SingularTransform,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Error::InvalidRange { reason, .. }
            | Error::InvalidParameter { reason, .. }
            | Error::EmptyVolume { reason, .. }
            | Error::EmptyInput { reason, .. }
            | Error::DegenerateGeometry { reason, .. }
            | Error::SingularTransform { reason, .. } => reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
