use super::{bind_output, bind_promotable, OperandBuffers};
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::FieldScalarType;
use crate::layout::DataLayout;
use crate::mdfield::AnyField;
use fieldgraph_traits::FieldScalar;
use itertools::izip;
use std::sync::Arc;

/// Pointwise operations of one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperation {
    /// `factor * x`
    Scale { factor: f64 },
    /// `ln(factor * x)`
    Log { factor: f64 },
    /// `exp(tau * x)`
    Exp { tau: f64 },
    /// `min(x, upper)`
    LowPass { upper: f64 },
    /// `max(x, lower)`
    HighPass { lower: f64 },
    /// `max(min(x, upper), lower)`
    BandPass { lower: f64, upper: f64 },
}

impl UnaryOperation {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOperation::Scale { .. } => "Scale",
            UnaryOperation::Log { .. } => "Log",
            UnaryOperation::Exp { .. } => "Exp",
            UnaryOperation::LowPass { .. } => "Lower Pass",
            UnaryOperation::HighPass { .. } => "High Pass",
            UnaryOperation::BandPass { .. } => "Band Pass",
        }
    }

    pub fn apply<S: FieldScalar>(&self, x: &S) -> S {
        match *self {
            UnaryOperation::Scale { factor } => x.clone() * factor,
            UnaryOperation::Log { factor } => (x.clone() * factor).ln(),
            UnaryOperation::Exp { tau } => (x.clone() * tau).exp(),
            UnaryOperation::LowPass { upper } => x.min(&S::from(upper)),
            UnaryOperation::HighPass { lower } => x.max(&S::from(lower)),
            UnaryOperation::BandPass { lower, upper } => x.min(&S::from(upper)).max(&S::from(lower)),
        }
    }
}

/// Pointwise operations of a field and a parameter field of the same layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOperation {
    /// `p * x`
    Scale,
    /// `x + p`
    Sum,
    /// `ln(p * x)`
    Log,
    /// `exp(p * x)`
    Exp,
    /// `min(x, p)`
    LowPass,
    /// `max(x, p)`
    HighPass,
    /// `max(min(x, upper), p)`
    BandPassFixedUpper { upper: f64 },
    /// `max(min(x, p), lower)`
    BandPassFixedLower { lower: f64 },
}

impl BinaryOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOperation::Scale => "Scale",
            BinaryOperation::Sum => "Sum",
            BinaryOperation::Log => "Log",
            BinaryOperation::Exp => "Exp",
            BinaryOperation::LowPass => "Lower Pass",
            BinaryOperation::HighPass => "High Pass",
            BinaryOperation::BandPassFixedUpper { .. } => "Band Pass Fixed Upper",
            BinaryOperation::BandPassFixedLower { .. } => "Band Pass Fixed Lower",
        }
    }

    pub fn apply<S: FieldScalar>(&self, x: &S, p: &S) -> S {
        match *self {
            BinaryOperation::Scale => p.clone() * x.clone(),
            BinaryOperation::Sum => x.clone() + p.clone(),
            BinaryOperation::Log => (p.clone() * x.clone()).ln(),
            BinaryOperation::Exp => (p.clone() * x.clone()).exp(),
            BinaryOperation::LowPass => x.min(p),
            BinaryOperation::HighPass => x.max(p),
            BinaryOperation::BandPassFixedUpper { upper } => x.min(&S::from(upper)).max(p),
            BinaryOperation::BandPassFixedLower { lower } => x.min(p).max(&S::from(lower)),
        }
    }
}

/// Applies a [`UnaryOperation`] to every entry of a field.
///
/// The output has the layout and scalar class of the input.
#[derive(Debug, Clone)]
pub struct SimpleUnaryOperation {
    name: String,
    input: AnyField,
    output: AnyField,
    op: UnaryOperation,
}

impl SimpleUnaryOperation {
    pub fn new(
        input: &str,
        output: &str,
        layout: &Arc<DataLayout>,
        class: FieldScalarType,
        op: UnaryOperation,
    ) -> Self {
        Self {
            name: format!("Simple Unary {}: {} -> {}", op.name(), input, output),
            input: AnyField::new(input, layout, class),
            output: AnyField::new(output, layout, class),
            op,
        }
    }

    pub fn output(&self) -> &AnyField {
        &self.output
    }

    fn apply<E: EvaluationType, S: FieldScalar>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let len = self.output.layout().active_size(data.num_cells());
        let buffers = data.scratch.get_or_default::<OperandBuffers<S>>();
        data.fields.read_promoted::<E, S>(&self.input, len, &mut buffers.first)?;
        let mut out = data.fields.view_any_mut::<S>(&self.output)?;
        for (o, x) in izip!(out.as_mut_slice(), &buffers.first) {
            *o = self.op.apply(x);
        }
        Ok(())
    }
}

impl<E: EvaluationType> Evaluator<E> for SimpleUnaryOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.input);
        fields.evaluates(&self.output);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_output(setup, &mut self.output)?;
        bind_promotable(setup, &mut self.input, self.output.scalar_type())
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        dispatch_scalar_type!(self.output.scalar_type(), E, self.apply(data))
    }
}

/// Applies a [`BinaryOperation`] entrywise to a field and a parameter field.
///
/// The output has the layout of the input and the stronger of the two scalar classes.
#[derive(Debug, Clone)]
pub struct SimpleBinaryOperation {
    name: String,
    input: AnyField,
    parameter: AnyField,
    output: AnyField,
    op: BinaryOperation,
}

impl SimpleBinaryOperation {
    pub fn new(
        input: (&str, FieldScalarType),
        parameter: (&str, FieldScalarType),
        output: &str,
        layout: &Arc<DataLayout>,
        op: BinaryOperation,
    ) -> Self {
        let class = input.1 | parameter.1;
        Self {
            name: format!("Simple Binary {}: ({}, {}) -> {}", op.name(), input.0, parameter.0, output),
            input: AnyField::new(input.0, layout, input.1),
            parameter: AnyField::new(parameter.0, layout, parameter.1),
            output: AnyField::new(output, layout, class),
            op,
        }
    }

    pub fn output(&self) -> &AnyField {
        &self.output
    }

    fn apply<E: EvaluationType, S: FieldScalar>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let len = self.output.layout().active_size(data.num_cells());
        let buffers = data.scratch.get_or_default::<OperandBuffers<S>>();
        data.fields.read_promoted::<E, S>(&self.input, len, &mut buffers.first)?;
        data.fields.read_promoted::<E, S>(&self.parameter, len, &mut buffers.second)?;
        let mut out = data.fields.view_any_mut::<S>(&self.output)?;
        for (o, x, p) in izip!(out.as_mut_slice(), &buffers.first, &buffers.second) {
            *o = self.op.apply(x, p);
        }
        Ok(())
    }
}

impl<E: EvaluationType> Evaluator<E> for SimpleBinaryOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.input);
        fields.depends_on(&self.parameter);
        fields.evaluates(&self.output);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_output(setup, &mut self.output)?;
        let class = self.output.scalar_type();
        bind_promotable(setup, &mut self.input, class)?;
        bind_promotable(setup, &mut self.parameter, class)
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        dispatch_scalar_type!(self.output.scalar_type(), E, self.apply(data))
    }
}

/// Clamps a field entrywise between a lower and an upper bound field:
/// `max(min(x, upper), lower)`.
#[derive(Debug, Clone)]
pub struct SimpleTernaryOperation {
    name: String,
    input: AnyField,
    lower: AnyField,
    upper: AnyField,
    output: AnyField,
}

impl SimpleTernaryOperation {
    /// A band pass with bound fields `lower` and `upper`, both of class `bounds_class`.
    pub fn band_pass(
        input: (&str, FieldScalarType),
        lower: &str,
        upper: &str,
        bounds_class: FieldScalarType,
        output: &str,
        layout: &Arc<DataLayout>,
    ) -> Self {
        let class = input.1 | bounds_class;
        Self {
            name: format!("Simple Ternary Band Pass: ({}, {}, {}) -> {}", input.0, lower, upper, output),
            input: AnyField::new(input.0, layout, input.1),
            lower: AnyField::new(lower, layout, bounds_class),
            upper: AnyField::new(upper, layout, bounds_class),
            output: AnyField::new(output, layout, class),
        }
    }

    pub fn output(&self) -> &AnyField {
        &self.output
    }

    fn apply<E: EvaluationType, S: FieldScalar>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let len = self.output.layout().active_size(data.num_cells());
        let buffers = data.scratch.get_or_default::<OperandBuffers<S>>();
        data.fields.read_promoted::<E, S>(&self.input, len, &mut buffers.first)?;
        data.fields.read_promoted::<E, S>(&self.lower, len, &mut buffers.second)?;
        data.fields.read_promoted::<E, S>(&self.upper, len, &mut buffers.third)?;
        let mut out = data.fields.view_any_mut::<S>(&self.output)?;
        for (o, x, lo, up) in izip!(out.as_mut_slice(), &buffers.first, &buffers.second, &buffers.third) {
            *o = x.min(up).max(lo);
        }
        Ok(())
    }
}

impl<E: EvaluationType> Evaluator<E> for SimpleTernaryOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.input);
        fields.depends_on(&self.lower);
        fields.depends_on(&self.upper);
        fields.evaluates(&self.output);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_output(setup, &mut self.output)?;
        let class = self.output.scalar_type();
        bind_promotable(setup, &mut self.input, class)?;
        bind_promotable(setup, &mut self.lower, class)?;
        bind_promotable(setup, &mut self.upper, class)
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        dispatch_scalar_type!(self.output.scalar_type(), E, self.apply(data))
    }
}
