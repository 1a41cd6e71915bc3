use super::bind_output;
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::FieldScalarType;
use crate::layout::DataLayout;
use crate::mdfield::AnyField;
use eyre::eyre;
use std::sync::Arc;

/// Exposes a named scalar parameter of the [`ParameterLibrary`](crate::params::ParameterLibrary)
/// as a one-entry parameter field of the same name.
///
/// The parameter is added to the library with its nominal value during setup unless it already
/// exists. Each evaluation reads the current library value, so updates through
/// [`ParameterLibrary::set_value`](crate::params::ParameterLibrary::set_value) are seen by the next
/// pass.
#[derive(Debug, Clone)]
pub struct SharedParameter {
    name: String,
    parameter: String,
    nominal: f64,
    field: AnyField,
}

impl SharedParameter {
    pub fn new(parameter: &str, layout: &Arc<DataLayout>, nominal: f64) -> Self {
        Self {
            name: format!("Shared Parameter {}", parameter),
            parameter: parameter.to_string(),
            nominal,
            field: AnyField::new(parameter, layout, FieldScalarType::ParamScalar),
        }
    }

    pub fn field(&self) -> &AnyField {
        &self.field
    }

    pub fn nominal_value(&self) -> f64 {
        self.nominal
    }
}

impl<E: EvaluationType> Evaluator<E> for SharedParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.evaluates(&self.field);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_output(setup, &mut self.field)?;
        setup.parameters().add(&self.parameter, self.nominal);
        Ok(())
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        let value = data
            .parameters
            .value(&self.parameter)
            .ok_or_else(|| eyre!("Parameter '{}' is missing from the parameter library", self.parameter))?;
        let value = E::scalar_parameter(data.inputs, &self.parameter, value);
        let mut view = data.fields.view_any_mut::<E::ParamScalarT>(&self.field)?;
        view.as_mut_slice().fill(value);
        Ok(())
    }
}
