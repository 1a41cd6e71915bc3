use super::bind_output;
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::FieldScalarType;
use crate::inputs::SolutionKind;
use crate::layout::{DataLayout, DimTag};
use crate::mdfield::AnyField;
use eyre::eyre;
use nalgebra::DVector;
use std::sync::Arc;

/// How gathered equations map to fields.
#[derive(Debug, Clone)]
enum GatherTargets {
    /// One [Cell, Node] field per equation.
    Scalar(Vec<AnyField>),
    /// One [Cell, Node, VecDim] field holding all equations.
    Vector(AnyField),
}

impl GatherTargets {
    fn new(names: &[&str], layout: &Arc<DataLayout>, vector: bool) -> Result<Self, GraphError> {
        if vector {
            layout.expect_dims(names[0], &[DimTag::Cell, DimTag::Node, DimTag::VecDim])?;
            Ok(GatherTargets::Vector(AnyField::new(names[0], layout, FieldScalarType::Scalar)))
        } else {
            for name in names {
                layout.expect_dims(name, &[DimTag::Cell, DimTag::Node])?;
            }
            Ok(GatherTargets::Scalar(
                names
                    .iter()
                    .map(|name| AnyField::new(name, layout, FieldScalarType::Scalar))
                    .collect(),
            ))
        }
    }

    fn num_components(&self) -> usize {
        match self {
            GatherTargets::Scalar(fields) => fields.len(),
            GatherTargets::Vector(field) => field.layout().extent(2),
        }
    }

    fn fields(&self) -> Vec<&AnyField> {
        match self {
            GatherTargets::Scalar(fields) => fields.iter().collect(),
            GatherTargets::Vector(field) => vec![field],
        }
    }

    fn fields_mut(&mut self) -> Vec<&mut AnyField> {
        match self {
            GatherTargets::Scalar(fields) => fields.iter_mut().collect(),
            GatherTargets::Vector(field) => vec![field],
        }
    }
}

/// Gathers solution values of the cell degrees of freedom into node fields.
///
/// Equations `offset..offset + n` of each node are gathered, where `n` is the number of scalar
/// fields or the vector dimension of the vector field. The gathered values are seeded according
/// to the evaluation type; see [`EvaluationType::gather_solution`].
#[derive(Debug, Clone)]
pub struct GatherSolution {
    name: String,
    offset: usize,
    targets: Vec<(SolutionKind, GatherTargets)>,
}

impl GatherSolution {
    /// Gathers `x` into one scalar [Cell, Node] field per name.
    pub fn scalar(names: &[&str], layout: &Arc<DataLayout>) -> Result<Self, GraphError> {
        Self::with_targets(names, layout, false)
    }

    /// Gathers `x` into a single [Cell, Node, VecDim] field.
    pub fn vector(name: &str, layout: &Arc<DataLayout>) -> Result<Self, GraphError> {
        Self::with_targets(&[name], layout, true)
    }

    fn with_targets(names: &[&str], layout: &Arc<DataLayout>, vector: bool) -> Result<Self, GraphError> {
        if names.is_empty() {
            return Err(GraphError::invalid_configuration("Gather Solution", "no solution field names given"));
        }
        Ok(Self {
            name: format!("Gather Solution {}", names.join(", ")),
            offset: 0,
            targets: vec![(SolutionKind::X, GatherTargets::new(names, layout, vector)?)],
        })
    }

    /// Gathers equations starting at `offset` instead of the first equation of each node.
    pub fn with_offset(self, offset: usize) -> Self {
        Self { offset, ..self }
    }

    /// Also gathers `xdot` into fields of the same shape.
    pub fn with_time_derivative(self, names: &[&str]) -> Result<Self, GraphError> {
        self.with_derivative(SolutionKind::XDot, names)
    }

    /// Also gathers `xdotdot` into fields of the same shape.
    pub fn with_second_time_derivative(self, names: &[&str]) -> Result<Self, GraphError> {
        self.with_derivative(SolutionKind::XDotDot, names)
    }

    fn with_derivative(mut self, kind: SolutionKind, names: &[&str]) -> Result<Self, GraphError> {
        let (layout, vector, num_components) = match &self.targets[0].1 {
            GatherTargets::Scalar(fields) => (Arc::clone(fields[0].layout()), false, fields.len()),
            GatherTargets::Vector(field) => (Arc::clone(field.layout()), true, 1),
        };
        if names.len() != num_components {
            return Err(GraphError::invalid_configuration(
                &self.name,
                format!("expected {} time derivative field names, got {}", num_components, names.len()),
            ));
        }
        self.targets.push((kind, GatherTargets::new(names, &layout, vector)?));
        Ok(self)
    }

    /// The fields receiving `x`.
    pub fn solution_fields(&self) -> Vec<&AnyField> {
        self.targets[0].1.fields()
    }

    fn gather<E: EvaluationType>(&self, data: &mut EvalData, kind: SolutionKind, targets: &GatherTargets) -> eyre::Result<()> {
        let workset = data.workset;
        let solution = data
            .inputs
            .solution(kind)
            .ok_or_else(|| eyre!("{:?} is not available for gathering", kind))?;
        let num_eq = workset.num_eq();
        let num_components = targets.num_components();
        if self.offset + num_components > num_eq {
            return Err(eyre!(
                "Cannot gather {} equations at offset {} with {} equations per node",
                num_components,
                self.offset,
                num_eq
            ));
        }

        let nodes_per_cell = workset.nodes_per_cell();
        let num_local = nodes_per_cell * num_eq;
        match targets {
            GatherTargets::Scalar(fields) => {
                for (k, field) in fields.iter().enumerate() {
                    let mut view = data.fields.view_any_mut::<E::ScalarT>(field)?;
                    for cell in 0..workset.num_cells() {
                        let dofs = workset.cell_dofs(cell);
                        for node in 0..nodes_per_cell {
                            let slot = node * num_eq + self.offset + k;
                            let gid = dofs[slot];
                            let value = solution_entry(solution, kind, gid)?;
                            view[(cell, node)] = E::gather_solution(data.inputs, kind, value, gid, slot, num_local);
                        }
                    }
                }
            }
            GatherTargets::Vector(field) => {
                let mut view = data.fields.view_any_mut::<E::ScalarT>(field)?;
                for cell in 0..workset.num_cells() {
                    let dofs = workset.cell_dofs(cell);
                    for node in 0..nodes_per_cell {
                        for k in 0..num_components {
                            let slot = node * num_eq + self.offset + k;
                            let gid = dofs[slot];
                            let value = solution_entry(solution, kind, gid)?;
                            view[(cell, node, k)] = E::gather_solution(data.inputs, kind, value, gid, slot, num_local);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn solution_entry(solution: &DVector<f64>, kind: SolutionKind, gid: usize) -> eyre::Result<f64> {
    solution
        .get(gid)
        .copied()
        .ok_or_else(|| eyre!("{:?} has {} entries, but DOF {} is gathered", kind, solution.len(), gid))
}

impl<E: EvaluationType> Evaluator<E> for GatherSolution {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        for (_, targets) in &self.targets {
            for field in targets.fields() {
                fields.evaluates(field);
            }
        }
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        for (_, targets) in &mut self.targets {
            for field in targets.fields_mut() {
                bind_output(setup, field)?;
            }
        }
        Ok(())
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        for (kind, targets) in &self.targets {
            self.gather::<E>(data, *kind, targets)?;
        }
        Ok(())
    }
}

/// Gathers a nodal distributed parameter into a [Cell, Node] parameter field of the same name.
///
/// In a distributed parameter derivative pass for this parameter, node `n` of each cell is
/// seeded at derivative slot `n`.
#[derive(Debug, Clone)]
pub struct GatherScalarNodalParameter {
    name: String,
    parameter: String,
    field: AnyField,
}

impl GatherScalarNodalParameter {
    pub fn new(parameter: &str, layout: &Arc<DataLayout>) -> Result<Self, GraphError> {
        layout.expect_dims(parameter, &[DimTag::Cell, DimTag::Node])?;
        Ok(Self {
            name: format!("Gather Parameter {}", parameter),
            parameter: parameter.to_string(),
            field: AnyField::new(parameter, layout, FieldScalarType::ParamScalar),
        })
    }

    pub fn field(&self) -> &AnyField {
        &self.field
    }
}

impl<E: EvaluationType> Evaluator<E> for GatherScalarNodalParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.evaluates(&self.field);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_output(setup, &mut self.field)
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        let workset = data.workset;
        let values = data
            .inputs
            .distributed_parameter(&self.parameter)
            .ok_or_else(|| eyre!("Distributed parameter '{}' is not bound", self.parameter))?;
        let nodes_per_cell = workset.nodes_per_cell();
        let mut view = data.fields.view_any_mut::<E::ParamScalarT>(&self.field)?;
        for cell in 0..workset.num_cells() {
            for (node, &gid) in workset.cell_nodes(cell).iter().enumerate() {
                let value = *values
                    .get(gid)
                    .ok_or_else(|| eyre!("Parameter '{}' has no value for node {}", self.parameter, gid))?;
                view[(cell, node)] = E::distributed_parameter(data.inputs, &self.parameter, value, node, nodes_per_cell);
            }
        }
        Ok(())
    }
}
