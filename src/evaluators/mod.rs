//! Built-in evaluators.
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::SetupData;
use crate::field::FieldScalarType;
use crate::mdfield::AnyField;

mod gather;
mod interpolation;
mod reduction;
mod response;
mod scatter;
mod shared_param;
mod simple_ops;
mod state_fields;

pub use gather::*;
pub use interpolation::*;
pub use reduction::*;
pub use response::*;
pub use scatter::*;
pub use shared_param::*;
pub use simple_ops::*;
pub use state_fields::*;

/// Binds `field` and checks that its values can be promoted into scalars of class `target`.
pub(crate) fn bind_promotable<E: EvaluationType>(
    setup: &SetupData<E>,
    field: &mut AnyField,
    target: FieldScalarType,
) -> Result<(), GraphError> {
    setup.bind_any(field)?;
    if field.scalar_type() > target {
        return Err(GraphError::ScalarTypeMismatch {
            field: field.tag().to_string(),
            storage: E::scalar_type_name(field.scalar_type()).to_string(),
        });
    }
    Ok(())
}

/// Binds an output field and checks that it is stored with the class it was declared with.
pub(crate) fn bind_output<E: EvaluationType>(setup: &SetupData<E>, field: &mut AnyField) -> Result<(), GraphError> {
    let declared = field.scalar_type();
    setup.bind_any(field)?;
    if field.scalar_type() != declared {
        return Err(GraphError::ScalarTypeMismatch {
            field: field.tag().to_string(),
            storage: E::scalar_type_name(field.scalar_type()).to_string(),
        });
    }
    Ok(())
}

/// Reusable operand buffers for evaluators reading promoted field values.
#[derive(Debug)]
pub(crate) struct OperandBuffers<S> {
    pub first: Vec<S>,
    pub second: Vec<S>,
    pub third: Vec<S>,
}

impl<S> Default for OperandBuffers<S> {
    fn default() -> Self {
        Self {
            first: Vec::new(),
            second: Vec::new(),
            third: Vec::new(),
        }
    }
}
