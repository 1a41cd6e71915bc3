//! Problem configuration: layouts, evaluators, external and required fields, read from JSON.
//!
//! Keys follow the parameter list names of the evaluators, e.g.
//!
//! ```json
//! {
//!   "Layout Dimensions": { "Workset Size": 2, "Nodes Per Cell": 4, "Quad Points Per Cell": 4 },
//!   "External Fields": [
//!     { "Name": "BF", "Layout": "Node QP Scalar", "Scalar Type": "Real", "Source": { "Workset Array": "BF" } }
//!   ],
//!   "Evaluators": [
//!     { "type": "Gather Solution", "Solution Names": ["T"] },
//!     { "type": "DOF Interpolation", "Variable Name": "T" }
//!   ],
//!   "Required Fields": [ { "Name": "T", "Layout": "QP Scalar" } ]
//! }
//! ```
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::Evaluator;
use crate::evaluators::*;
use crate::field::{FieldScalarType, FieldTag};
use crate::layout::{LayoutDims, Layouts};
use crate::manager::{ExternalSource, FieldManager};
use crate::params::{nominal_value_or, ParameterLibrary};
use crate::state::StateManager;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

fn default_scalar() -> FieldScalarType {
    FieldScalarType::Scalar
}

fn default_real() -> FieldScalarType {
    FieldScalarType::Real
}

fn default_one() -> f64 {
    1.0
}

fn default_bf() -> String {
    "BF".to_string()
}

fn default_weights() -> String {
    "Weights".to_string()
}

fn default_node_scalar() -> String {
    "Node Scalar".to_string()
}

fn default_qp_scalar() -> String {
    "QP Scalar".to_string()
}

/// A field referenced by name, layout name and scalar class.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldConfig {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Layout")]
    pub layout: String,
    #[serde(rename = "Scalar Type", default = "default_scalar")]
    pub scalar_type: FieldScalarType,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum SourceConfig {
    Coordinates,
    #[serde(rename = "Workset Array")]
    WorksetArray(String),
    State(String),
}

impl From<SourceConfig> for ExternalSource {
    fn from(source: SourceConfig) -> Self {
        match source {
            SourceConfig::Coordinates => ExternalSource::Coordinates,
            SourceConfig::WorksetArray(name) => ExternalSource::WorksetArray(name),
            SourceConfig::State(name) => ExternalSource::State(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExternalFieldConfig {
    #[serde(flatten)]
    pub field: FieldConfig,
    #[serde(rename = "Source")]
    pub source: SourceConfig,
}

/// Configuration of one evaluator, tagged by its `"type"` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum EvaluatorConfig {
    #[serde(rename = "Gather Solution")]
    GatherSolution {
        #[serde(rename = "Solution Names")]
        names: Vec<String>,
        #[serde(rename = "Time Derivative Names", default)]
        xdot_names: Option<Vec<String>>,
        #[serde(rename = "Second Time Derivative Names", default)]
        xdotdot_names: Option<Vec<String>>,
        #[serde(rename = "Vector Field", default)]
        vector: bool,
        #[serde(rename = "Offset of First DOF", default)]
        offset: usize,
    },
    #[serde(rename = "Gather Scalar Nodal Parameter")]
    GatherScalarNodalParameter {
        #[serde(rename = "Parameter Name")]
        parameter: String,
    },
    #[serde(rename = "Scatter Residual")]
    ScatterResidual {
        #[serde(rename = "Scatter Field Name")]
        name: String,
        #[serde(rename = "Residual Names")]
        residuals: Vec<String>,
        #[serde(rename = "Vector Field", default)]
        vector: bool,
        #[serde(rename = "Offset of First DOF", default)]
        offset: usize,
    },
    #[serde(rename = "Shared Parameter")]
    SharedParameter {
        #[serde(rename = "Parameter Name")]
        parameter: String,
        #[serde(rename = "Default Value", default)]
        default: f64,
    },
    #[serde(rename = "Simple Unary Operation")]
    SimpleUnary {
        #[serde(rename = "Operation")]
        operation: String,
        #[serde(rename = "Input Field Name")]
        input: String,
        #[serde(rename = "Output Field Name")]
        output: String,
        #[serde(rename = "Field Layout")]
        layout: String,
        #[serde(rename = "Input Field Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
        #[serde(rename = "Scaling Factor", default)]
        scaling_factor: Option<f64>,
        #[serde(rename = "Factor", default = "default_one")]
        factor: f64,
        #[serde(rename = "Tau", default = "default_one")]
        tau: f64,
        #[serde(rename = "Lower Threshold", default)]
        lower: Option<f64>,
        #[serde(rename = "Upper Threshold", default)]
        upper: Option<f64>,
    },
    #[serde(rename = "Simple Binary Operation")]
    SimpleBinary {
        #[serde(rename = "Operation")]
        operation: String,
        #[serde(rename = "Input Field Name")]
        input: String,
        #[serde(rename = "Input Field Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
        #[serde(rename = "Parameter Field 1")]
        parameter: String,
        #[serde(rename = "Parameter Field 1 Scalar Type", default = "default_real")]
        parameter_class: FieldScalarType,
        #[serde(rename = "Output Field Name")]
        output: String,
        #[serde(rename = "Field Layout")]
        layout: String,
        #[serde(rename = "Lower Threshold", default)]
        lower: Option<f64>,
        #[serde(rename = "Upper Threshold", default)]
        upper: Option<f64>,
    },
    #[serde(rename = "Simple Ternary Operation")]
    SimpleTernary {
        #[serde(rename = "Operation")]
        operation: String,
        #[serde(rename = "Input Field Name")]
        input: String,
        #[serde(rename = "Input Field Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
        #[serde(rename = "Parameter Field 1")]
        lower: String,
        #[serde(rename = "Parameter Field 2")]
        upper: String,
        #[serde(rename = "Parameter Field 1 Scalar Type", default = "default_real")]
        bounds_class: FieldScalarType,
        #[serde(rename = "Output Field Name")]
        output: String,
        #[serde(rename = "Field Layout")]
        layout: String,
    },
    #[serde(rename = "DOF Interpolation")]
    DofInterpolation {
        #[serde(rename = "Variable Name")]
        input: String,
        /// Defaults to the input name; the two fields differ by layout.
        #[serde(rename = "Output Name", default)]
        output: Option<String>,
        #[serde(rename = "BF Name", default = "default_bf")]
        basis: String,
        #[serde(rename = "Node Layout", default = "default_node_scalar")]
        node_layout: String,
        #[serde(rename = "QP Layout", default = "default_qp_scalar")]
        qp_layout: String,
        #[serde(rename = "Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
    },
    #[serde(rename = "P0 Interpolation")]
    P0Interpolation {
        #[serde(rename = "Field Name")]
        input: String,
        #[serde(rename = "Output Name", default)]
        output: Option<String>,
        #[serde(rename = "Interpolation Type")]
        kind: String,
        #[serde(rename = "Input Layout")]
        input_layout: String,
        #[serde(rename = "Output Layout")]
        output_layout: String,
        #[serde(rename = "Weighted Measure Name", default = "default_weights")]
        weights: String,
        #[serde(rename = "Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
    },
    #[serde(rename = "Cell Reduction")]
    CellReduction {
        #[serde(rename = "Input Field Name")]
        input: String,
        #[serde(rename = "Output Field Name")]
        output: String,
        #[serde(rename = "Input Layout")]
        input_layout: String,
        #[serde(rename = "Output Layout")]
        output_layout: String,
        #[serde(rename = "Reduction")]
        reduction: String,
        #[serde(rename = "Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
    },
    #[serde(rename = "Load State Field")]
    LoadStateField {
        #[serde(rename = "Field Name")]
        field: String,
        #[serde(rename = "State Name")]
        state: String,
        #[serde(rename = "Field Layout")]
        layout: String,
        #[serde(rename = "Scalar Type", default = "default_real")]
        class: FieldScalarType,
        #[serde(rename = "Initial Value", default)]
        init: f64,
    },
    #[serde(rename = "Save State Field")]
    SaveStateField {
        #[serde(rename = "Field Name")]
        field: String,
        #[serde(rename = "State Name")]
        state: String,
        #[serde(rename = "Field Layout")]
        layout: String,
        #[serde(rename = "Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
        #[serde(rename = "Save Old", default)]
        save_old: bool,
    },
    #[serde(rename = "Save Side Set State Field")]
    SaveSideSetStateField {
        #[serde(rename = "Field Name")]
        field: String,
        #[serde(rename = "State Name")]
        state: String,
        #[serde(rename = "Side Set Name")]
        side_set: String,
        #[serde(rename = "Field Layout")]
        layout: String,
        #[serde(rename = "Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
    },
    #[serde(rename = "Integral Response")]
    IntegralResponse {
        #[serde(rename = "Response Name")]
        response: String,
        #[serde(rename = "Field Name")]
        field: String,
        #[serde(rename = "Weighted Measure Name", default = "default_weights")]
        weights: String,
        #[serde(rename = "Scaling", default = "default_one")]
        scaling: f64,
        #[serde(rename = "Scalar Type", default = "default_scalar")]
        class: FieldScalarType,
    },
}

/// A complete problem description from which field managers are built.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProblemConfig {
    #[serde(rename = "Layout Dimensions")]
    pub layout: LayoutDims,
    /// Parameter list used for nominal values of shared parameters.
    #[serde(rename = "Parameters", default)]
    pub parameters: Option<Value>,
    #[serde(rename = "External Fields", default)]
    pub externals: Vec<ExternalFieldConfig>,
    #[serde(rename = "Evaluators")]
    pub evaluators: Vec<EvaluatorConfig>,
    #[serde(rename = "Required Fields", default)]
    pub required: Vec<FieldConfig>,
}

impl ProblemConfig {
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        serde_json::from_str(text)
            .map_err(|err| GraphError::invalid_configuration("problem configuration", err.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, GraphError> {
        serde_json::from_value(value)
            .map_err(|err| GraphError::invalid_configuration("problem configuration", err.to_string()))
    }

    pub fn factory(&self) -> EvaluatorFactory {
        EvaluatorFactory::new(Layouts::new(self.layout), self.parameters.clone())
    }

    /// Builds and sets up a field manager for evaluation type `E`.
    pub fn build_field_manager<E: EvaluationType>(
        &self,
        parameters: Arc<ParameterLibrary>,
        states: Option<Arc<StateManager>>,
    ) -> Result<FieldManager<E>, GraphError> {
        let factory = self.factory();
        let mut manager = FieldManager::new(parameters);
        if let Some(states) = states {
            manager = manager.with_state_manager(states);
        }
        for external in &self.externals {
            let tag = factory.field_tag(&external.field)?;
            manager.declare_external(&tag, external.source.clone().into())?;
        }
        for config in &self.evaluators {
            manager.register_boxed(factory.build::<E>(config)?)?;
        }
        for required in &self.required {
            manager.require_field(&factory.field_tag(required)?)?;
        }
        manager.post_registration_setup()?;
        Ok(manager)
    }
}

/// Constructs evaluators from their configuration records.
#[derive(Debug, Clone)]
pub struct EvaluatorFactory {
    layouts: Layouts,
    parameters: Option<Value>,
}

fn required<T>(value: Option<T>, context: &str, key: &str) -> Result<T, GraphError> {
    value.ok_or_else(|| GraphError::invalid_configuration(context, format!("missing \"{}\"", key)))
}

fn unknown(context: &str, key: &str, value: &str) -> GraphError {
    GraphError::invalid_configuration(context, format!("unknown {} '{}'", key, value))
}

impl EvaluatorFactory {
    pub fn new(layouts: Layouts, parameters: Option<Value>) -> Self {
        Self { layouts, parameters }
    }

    pub fn layouts(&self) -> &Layouts {
        &self.layouts
    }

    pub fn field_tag(&self, field: &FieldConfig) -> Result<FieldTag, GraphError> {
        let layout = self.layouts.layout_by_name(&field.layout)?;
        Ok(FieldTag::new(&field.name, &layout, field.scalar_type))
    }

    pub fn build<E: EvaluationType>(&self, config: &EvaluatorConfig) -> Result<Box<dyn Evaluator<E>>, GraphError> {
        let l = &self.layouts;
        let layout = |name: &str| l.layout_by_name(name);
        let evaluator: Box<dyn Evaluator<E>> = match config {
            EvaluatorConfig::GatherSolution {
                names,
                xdot_names,
                xdotdot_names,
                vector,
                offset,
            } => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                let mut gather = if *vector {
                    let name = required(names.first().copied(), "Gather Solution", "Solution Names")?;
                    GatherSolution::vector(name, &l.node_vector)?
                } else {
                    GatherSolution::scalar(&names, &l.node_scalar)?
                };
                gather = gather.with_offset(*offset);
                if let Some(xdot) = xdot_names {
                    let xdot: Vec<&str> = xdot.iter().map(String::as_str).collect();
                    gather = gather.with_time_derivative(&xdot)?;
                }
                if let Some(xdotdot) = xdotdot_names {
                    let xdotdot: Vec<&str> = xdotdot.iter().map(String::as_str).collect();
                    gather = gather.with_second_time_derivative(&xdotdot)?;
                }
                Box::new(gather)
            }
            EvaluatorConfig::GatherScalarNodalParameter { parameter } => {
                Box::new(GatherScalarNodalParameter::new(parameter, &l.node_scalar)?)
            }
            EvaluatorConfig::ScatterResidual {
                name,
                residuals,
                vector,
                offset,
            } => {
                let residuals: Vec<&str> = residuals.iter().map(String::as_str).collect();
                let scatter = if *vector {
                    let residual = required(residuals.first().copied(), "Scatter Residual", "Residual Names")?;
                    ScatterResidual::vector(name, residual, &l.node_vector, &l.dummy)?
                } else {
                    ScatterResidual::scalar(name, &residuals, &l.node_scalar, &l.dummy)?
                };
                Box::new(scatter.with_offset(*offset))
            }
            EvaluatorConfig::SharedParameter { parameter, default } => {
                let nominal = nominal_value_or(self.parameters.as_ref(), parameter, *default);
                Box::new(SharedParameter::new(parameter, &l.shared_param, nominal))
            }
            EvaluatorConfig::SimpleUnary {
                operation,
                input,
                output,
                layout: layout_name,
                class,
                scaling_factor,
                factor,
                tau,
                lower,
                upper,
            } => {
                let context = "Simple Unary Operation";
                let op = match operation.as_str() {
                    "Scale" => UnaryOperation::Scale {
                        factor: required(*scaling_factor, context, "Scaling Factor")?,
                    },
                    "Log" => UnaryOperation::Log { factor: *factor },
                    "Exp" => UnaryOperation::Exp { tau: *tau },
                    "Lower Pass" => UnaryOperation::LowPass {
                        upper: required(*upper, context, "Upper Threshold")?,
                    },
                    "High Pass" => UnaryOperation::HighPass {
                        lower: required(*lower, context, "Lower Threshold")?,
                    },
                    "Band Pass" => UnaryOperation::BandPass {
                        lower: required(*lower, context, "Lower Threshold")?,
                        upper: required(*upper, context, "Upper Threshold")?,
                    },
                    other => return Err(unknown(context, "operation", other)),
                };
                Box::new(SimpleUnaryOperation::new(input, output, &layout(layout_name)?, *class, op))
            }
            EvaluatorConfig::SimpleBinary {
                operation,
                input,
                class,
                parameter,
                parameter_class,
                output,
                layout: layout_name,
                lower,
                upper,
            } => {
                let context = "Simple Binary Operation";
                let op = match operation.as_str() {
                    "Scale" => BinaryOperation::Scale,
                    "Sum" => BinaryOperation::Sum,
                    "Log" => BinaryOperation::Log,
                    "Exp" => BinaryOperation::Exp,
                    "Lower Pass" => BinaryOperation::LowPass,
                    "High Pass" => BinaryOperation::HighPass,
                    "Band Pass Fixed Upper" => BinaryOperation::BandPassFixedUpper {
                        upper: required(*upper, context, "Upper Threshold")?,
                    },
                    "Band Pass Fixed Lower" => BinaryOperation::BandPassFixedLower {
                        lower: required(*lower, context, "Lower Threshold")?,
                    },
                    other => return Err(unknown(context, "operation", other)),
                };
                Box::new(SimpleBinaryOperation::new(
                    (input, *class),
                    (parameter, *parameter_class),
                    output,
                    &layout(layout_name)?,
                    op,
                ))
            }
            EvaluatorConfig::SimpleTernary {
                operation,
                input,
                class,
                lower,
                upper,
                bounds_class,
                output,
                layout: layout_name,
            } => {
                if operation != "Band Pass" {
                    return Err(unknown("Simple Ternary Operation", "operation", operation));
                }
                Box::new(SimpleTernaryOperation::band_pass(
                    (input, *class),
                    lower,
                    upper,
                    *bounds_class,
                    output,
                    &layout(layout_name)?,
                ))
            }
            EvaluatorConfig::DofInterpolation {
                input,
                output,
                basis,
                node_layout,
                qp_layout,
                class,
            } => Box::new(DofInterpolation::new(
                input,
                output.as_deref().unwrap_or(input),
                basis,
                &layout(node_layout)?,
                &layout(qp_layout)?,
                &l.node_qp_scalar,
                *class,
            )?),
            EvaluatorConfig::P0Interpolation {
                input,
                output,
                kind,
                input_layout,
                output_layout,
                weights,
                class,
            } => {
                let output = output.as_deref().unwrap_or(input);
                let p0 = match kind.as_str() {
                    "Cell Average" => P0Interpolation::cell_average(
                        input,
                        output,
                        weights,
                        &layout(input_layout)?,
                        &l.qp_scalar,
                        &layout(output_layout)?,
                        *class,
                    )?,
                    "Value At Cell Barycenter" => P0Interpolation::barycenter_value(
                        input,
                        output,
                        &layout(input_layout)?,
                        &layout(output_layout)?,
                        *class,
                    )?,
                    other => return Err(unknown("P0 Interpolation", "interpolation type", other)),
                };
                Box::new(p0)
            }
            EvaluatorConfig::CellReduction {
                input,
                output,
                input_layout,
                output_layout,
                reduction,
                class,
            } => {
                let kind = match reduction.as_str() {
                    "Sum" => ReductionKind::Sum,
                    "Mean" => ReductionKind::Mean,
                    other => return Err(unknown("Cell Reduction", "reduction", other)),
                };
                Box::new(CellReduction::new(
                    input,
                    output,
                    &layout(input_layout)?,
                    &layout(output_layout)?,
                    *class,
                    kind,
                )?)
            }
            EvaluatorConfig::LoadStateField {
                field,
                state,
                layout: layout_name,
                class,
                init,
            } => Box::new(LoadStateField::new(field, state, &layout(layout_name)?, *class, *init)),
            EvaluatorConfig::SaveStateField {
                field,
                state,
                layout: layout_name,
                class,
                save_old,
            } => Box::new(SaveStateField::new(
                field,
                state,
                &layout(layout_name)?,
                &l.dummy,
                *class,
                *save_old,
            )),
            EvaluatorConfig::SaveSideSetStateField {
                field,
                state,
                side_set,
                layout: layout_name,
                class,
            } => Box::new(SaveSideSetStateField::new(
                field,
                state,
                side_set,
                &layout(layout_name)?,
                &l.dummy,
                *class,
            )?),
            EvaluatorConfig::IntegralResponse {
                response,
                field,
                weights,
                scaling,
                class,
            } => Box::new(IntegralResponse::new(
                response,
                field,
                weights,
                &l.qp_scalar,
                &l.dummy,
                *class,
                *scaling,
            )?),
        };
        Ok(evaluator)
    }
}
