use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// Errors detected while configuring, building or setting up an evaluator graph.
///
/// All of these are fatal and are reported before any evaluation pass starts. Errors raised
/// during evaluation are reported through [`eyre::Report`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A construction parameter is missing or malformed.
    InvalidConfiguration { context: String, message: String },
    /// Two providers claim the same field.
    DuplicateOutput {
        field: String,
        evaluator: String,
        existing: String,
    },
    /// A dependent field has no provider and is not an external input.
    MissingProvider { field: String, required_by: String },
    /// The dependency graph contains a cycle.
    ///
    /// `evaluators` lists the evaluators on the cycle, starting and ending with the same one.
    /// `fields` lists the fields connecting consecutive evaluators.
    CyclicDependency {
        evaluators: Vec<String>,
        fields: Vec<String>,
    },
    /// A field does not have the shape its consumer expects.
    LayoutMismatch {
        field: String,
        expected: String,
        found: String,
    },
    /// A field handle requests a scalar type different from the storage bound to the field.
    ScalarTypeMismatch { field: String, storage: String },
    /// The operation is only valid before setup.
    AlreadyFinalized { operation: String },
    /// The operation is only valid after setup.
    NotFinalized { operation: String },
}

impl GraphError {
    pub fn invalid_configuration(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            context: context.into(),
            message: message.into(),
        }
    }
}

impl Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            GraphError::InvalidConfiguration { context, message } => {
                write!(f, "Invalid configuration for {}: {}", context, message)
            }
            GraphError::DuplicateOutput {
                field,
                evaluator,
                existing,
            } => {
                write!(
                    f,
                    "Field {} is evaluated by '{}', but is already provided by '{}'.",
                    field, evaluator, existing
                )
            }
            GraphError::MissingProvider { field, required_by } => {
                write!(
                    f,
                    "No evaluator provides field {} (required by '{}') and it is not an external input.",
                    field, required_by
                )
            }
            GraphError::CyclicDependency { evaluators, fields } => {
                write!(f, "Cyclic dependency: ")?;
                for (i, evaluator) in evaluators.iter().enumerate() {
                    write!(f, "'{}'", evaluator)?;
                    if let Some(field) = fields.get(i) {
                        write!(f, " -[{}]-> ", field)?;
                    }
                }
                Ok(())
            }
            GraphError::LayoutMismatch { field, expected, found } => {
                write!(
                    f,
                    "Layout mismatch for field {}: expected {}, found {}.",
                    field, expected, found
                )
            }
            GraphError::ScalarTypeMismatch { field, storage } => {
                write!(
                    f,
                    "Scalar type mismatch for field {}: storage holds {} values.",
                    field, storage
                )
            }
            GraphError::AlreadyFinalized { operation } => {
                write!(f, "Cannot {} after post-registration setup.", operation)
            }
            GraphError::NotFinalized { operation } => {
                write!(f, "Cannot {} before post-registration setup.", operation)
            }
        }
    }
}

impl Error for GraphError {}
