//! Strategies for random evaluator graphs.
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::{FieldScalarType, FieldTag};
use crate::layout::DataLayout;
use crate::mdfield::AnyField;
use ::proptest::prelude::*;
use fieldgraph_traits::FieldScalar;
use std::sync::Arc;

/// A random acyclic graph: node `i` depends on the listed nodes, all smaller than `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagSpec {
    pub dependencies: Vec<Vec<usize>>,
    /// The order in which the nodes are registered, a permutation of `0..n`.
    pub registration_order: Vec<usize>,
}

impl DagSpec {
    pub fn num_nodes(&self) -> usize {
        self.dependencies.len()
    }

    pub fn field_name(node: usize) -> String {
        format!("f{}", node)
    }

    /// Evaluators computing `f_i = 1 + sum_j f_j` over the dependencies `j` of `i`, in
    /// registration order.
    pub fn evaluators(&self, layout: &Arc<DataLayout>) -> Vec<DagNodeEvaluator> {
        self.registration_order
            .iter()
            .map(|&i| DagNodeEvaluator::new(i, &self.dependencies[i], layout))
            .collect()
    }

    /// The value of every node when all leaves evaluate to one.
    pub fn expected_values(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.num_nodes());
        for deps in &self.dependencies {
            let value = 1.0 + deps.iter().map(|&j| values[j]).sum::<f64>();
            values.push(value);
        }
        values
    }
}

/// Random graphs with up to `max_nodes` nodes, registered in random order.
pub fn dag(max_nodes: usize) -> impl Strategy<Value = DagSpec> {
    (1..=max_nodes.max(1))
        .prop_flat_map(|n| {
            let dependencies: Vec<_> = (0..n)
                .map(|i| ::proptest::sample::subsequence((0..i).collect::<Vec<_>>(), 0..=i))
                .collect();
            let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
            (dependencies, order)
        })
        .prop_map(|(dependencies, registration_order)| DagSpec {
            dependencies,
            registration_order,
        })
}

/// One node of a [`DagSpec`] graph.
#[derive(Debug, Clone)]
pub struct DagNodeEvaluator {
    name: String,
    inputs: Vec<AnyField>,
    output: AnyField,
}

impl DagNodeEvaluator {
    pub fn new(node: usize, dependencies: &[usize], layout: &Arc<DataLayout>) -> Self {
        Self {
            name: format!("Node {}", node),
            inputs: dependencies
                .iter()
                .map(|&j| AnyField::new(DagSpec::field_name(j), layout, FieldScalarType::Scalar))
                .collect(),
            output: AnyField::new(DagSpec::field_name(node), layout, FieldScalarType::Scalar),
        }
    }

    pub fn output_tag(&self) -> &FieldTag {
        self.output.tag()
    }

    fn sum<E: EvaluationType, S: FieldScalar>(&self, data: &mut EvalData) -> eyre::Result<()> {
        let len = self.output.layout().active_size(data.num_cells());
        let mut total = vec![S::from(1.0); len];
        let mut values = Vec::new();
        for input in &self.inputs {
            data.fields.read_promoted::<E, S>(input, len, &mut values)?;
            for (t, v) in total.iter_mut().zip(&values) {
                *t += v.clone();
            }
        }
        let mut out = data.fields.view_any_mut::<S>(&self.output)?;
        out.as_mut_slice()[..len].clone_from_slice(&total);
        Ok(())
    }
}

impl<E: EvaluationType> Evaluator<E> for DagNodeEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        for input in &self.inputs {
            fields.depends_on(input);
        }
        fields.evaluates(&self.output);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        setup.bind_any(&mut self.output)?;
        for input in &mut self.inputs {
            setup.bind_any(input)?;
        }
        Ok(())
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        dispatch_scalar_type!(self.output.scalar_type(), E, self.sum(data))
    }
}
