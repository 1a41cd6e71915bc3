//! Evaluation types and their scalar representations.
//!
//! An evaluation type fixes the concrete scalar type behind each [`FieldScalarType`] and the
//! seeding rules used when solution and parameter values enter the graph. Evaluators are generic
//! over [`EvaluationType`], so the same evaluator body computes plain residuals as well as
//! Jacobians, tangents and distributed parameter derivatives.
use crate::field::FieldScalarType;
use crate::inputs::{EvaluationInputs, SolutionKind};
use crate::workset::CellColumns;
use crate::FadType;
use fieldgraph_traits::FieldScalar;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationKind {
    Residual,
    Jacobian,
    Tangent,
    DistParamDeriv,
}

impl EvaluationKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EvaluationKind::Residual => "<Residual>",
            EvaluationKind::Jacobian => "<Jacobian>",
            EvaluationKind::Tangent => "<Tangent>",
            EvaluationKind::DistParamDeriv => "<DistParamDeriv>",
        }
    }
}

impl Display for EvaluationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

pub trait EvaluationType: 'static + Send + Sync + Sized {
    /// The primary scalar type, carrying derivatives w.r.t. the unknowns of the pass.
    type ScalarT: FieldScalar;
    type MeshScalarT: FieldScalar;
    type ParamScalarT: FieldScalar;

    const KIND: EvaluationKind;

    fn scalar_type_id(class: FieldScalarType) -> TypeId {
        match class {
            FieldScalarType::Real => TypeId::of::<f64>(),
            FieldScalarType::MeshScalar => TypeId::of::<Self::MeshScalarT>(),
            FieldScalarType::ParamScalar => TypeId::of::<Self::ParamScalarT>(),
            FieldScalarType::Scalar => TypeId::of::<Self::ScalarT>(),
        }
    }

    fn scalar_type_name(class: FieldScalarType) -> &'static str {
        match class {
            FieldScalarType::Real => type_name::<f64>(),
            FieldScalarType::MeshScalar => type_name::<Self::MeshScalarT>(),
            FieldScalarType::ParamScalar => type_name::<Self::ParamScalarT>(),
            FieldScalarType::Scalar => type_name::<Self::ScalarT>(),
        }
    }

    /// Allocates zero-initialized storage for `len` values of the given class.
    fn zeroed_buffer(class: FieldScalarType, len: usize) -> Box<dyn Any + Send> {
        match class {
            FieldScalarType::Real => Box::new(vec![0.0f64; len]),
            FieldScalarType::MeshScalar => Box::new(vec![Self::MeshScalarT::from(0.0); len]),
            FieldScalarType::ParamScalar => Box::new(vec![Self::ParamScalarT::from(0.0); len]),
            FieldScalarType::Scalar => Box::new(vec![Self::ScalarT::from(0.0); len]),
        }
    }

    /// The value of a gathered solution entry.
    ///
    /// `slot` is the local column of the entry within its cell and `num_local` the number of
    /// local columns of the cell.
    fn gather_solution(
        inputs: &EvaluationInputs,
        kind: SolutionKind,
        value: f64,
        gid: usize,
        slot: usize,
        num_local: usize,
    ) -> Self::ScalarT;

    /// The value of a gathered entry of a distributed (nodal) parameter.
    fn distributed_parameter(
        inputs: &EvaluationInputs,
        name: &str,
        value: f64,
        slot: usize,
        num_local: usize,
    ) -> Self::ParamScalarT;

    /// The value of a named scalar parameter.
    fn scalar_parameter(inputs: &EvaluationInputs, name: &str, value: f64) -> Self::ParamScalarT;

    /// The global column that derivative `slot` of a cell contributes to, if any.
    fn derivative_column(columns: &CellColumns, slot: usize) -> Option<usize>;
}

/// Plain values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Residual;

/// Values and derivatives w.r.t. the local degrees of freedom of each cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jacobian;

/// Values and directional derivatives along the tangent directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tangent;

/// Values and derivatives w.r.t. the nodal values of a distributed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistParamDeriv;

impl EvaluationType for Residual {
    type ScalarT = f64;
    type MeshScalarT = f64;
    type ParamScalarT = f64;

    const KIND: EvaluationKind = EvaluationKind::Residual;

    fn gather_solution(_: &EvaluationInputs, _: SolutionKind, value: f64, _: usize, _: usize, _: usize) -> f64 {
        value
    }

    fn distributed_parameter(_: &EvaluationInputs, _: &str, value: f64, _: usize, _: usize) -> f64 {
        value
    }

    fn scalar_parameter(_: &EvaluationInputs, _: &str, value: f64) -> f64 {
        value
    }

    fn derivative_column(_: &CellColumns, _: usize) -> Option<usize> {
        None
    }
}

impl EvaluationType for Jacobian {
    type ScalarT = FadType;
    type MeshScalarT = f64;
    type ParamScalarT = f64;

    const KIND: EvaluationKind = EvaluationKind::Jacobian;

    fn gather_solution(
        inputs: &EvaluationInputs,
        kind: SolutionKind,
        value: f64,
        _gid: usize,
        slot: usize,
        num_local: usize,
    ) -> FadType {
        FadType::seeded(value, num_local, slot, inputs.coefficient(kind))
    }

    fn distributed_parameter(_: &EvaluationInputs, _: &str, value: f64, _: usize, _: usize) -> f64 {
        value
    }

    fn scalar_parameter(_: &EvaluationInputs, _: &str, value: f64) -> f64 {
        value
    }

    fn derivative_column(columns: &CellColumns, slot: usize) -> Option<usize> {
        columns.dofs.get(slot).copied()
    }
}

impl EvaluationType for Tangent {
    type ScalarT = FadType;
    type MeshScalarT = f64;
    type ParamScalarT = FadType;

    const KIND: EvaluationKind = EvaluationKind::Tangent;

    fn gather_solution(
        inputs: &EvaluationInputs,
        kind: SolutionKind,
        value: f64,
        gid: usize,
        _slot: usize,
        _num_local: usize,
    ) -> FadType {
        let num_dirs = inputs.num_tangent_directions();
        match (kind, inputs.vx()) {
            (SolutionKind::X, Some(vx)) if num_dirs > 0 => {
                let beta = inputs.coefficient(kind);
                let mut dx = vec![0.0; num_dirs];
                for (j, d) in dx.iter_mut().enumerate().take(vx.ncols()) {
                    *d = beta * vx[(gid, j)];
                }
                FadType::from_value_and_derivatives(value, dx)
            }
            _ => FadType::constant(value),
        }
    }

    fn distributed_parameter(_: &EvaluationInputs, _: &str, value: f64, _: usize, _: usize) -> FadType {
        FadType::constant(value)
    }

    fn scalar_parameter(inputs: &EvaluationInputs, name: &str, value: f64) -> FadType {
        match inputs.tangent_param_slot(name) {
            Some(slot) => FadType::variable(value, inputs.num_tangent_directions(), slot),
            None => FadType::constant(value),
        }
    }

    fn derivative_column(_: &CellColumns, slot: usize) -> Option<usize> {
        Some(slot)
    }
}

impl EvaluationType for DistParamDeriv {
    type ScalarT = FadType;
    type MeshScalarT = f64;
    type ParamScalarT = FadType;

    const KIND: EvaluationKind = EvaluationKind::DistParamDeriv;

    fn gather_solution(_: &EvaluationInputs, _: SolutionKind, value: f64, _: usize, _: usize, _: usize) -> FadType {
        FadType::constant(value)
    }

    fn distributed_parameter(
        inputs: &EvaluationInputs,
        name: &str,
        value: f64,
        slot: usize,
        num_local: usize,
    ) -> FadType {
        if inputs.active_distributed_parameter() == Some(name) {
            FadType::variable(value, num_local, slot)
        } else {
            FadType::constant(value)
        }
    }

    fn scalar_parameter(_: &EvaluationInputs, _: &str, value: f64) -> FadType {
        FadType::constant(value)
    }

    fn derivative_column(columns: &CellColumns, slot: usize) -> Option<usize> {
        columns.nodes.get(slot).copied()
    }
}
