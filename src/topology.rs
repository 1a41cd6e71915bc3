//! Topology penalization and topology-weighted measures over a discretization.
//!
//! A topology is a nodal field `p` with values in `[0, 1]` describing where material is present.
//! Measures such as volume or mass are integrals over the mesh of a per-quadrature point
//! [`MeasureModel`] evaluated at the interpolated topology values.
use crate::comm::Communicator;
use crate::discretization::Discretization;
use crate::error::GraphError;
use eyre::eyre;
use fieldgraph_traits::Real;
use log::debug;
use nalgebra::{DMatrix, DVector};
use numeric_literals::replace_float_literals;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A penalization function `R(rho)` of a topology value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Penalization {
    /// `rho^p`
    Simp { exponent: f64 },
    /// `rho / (1 + q (1 - rho))`
    Ramp { q: f64 },
    Identity,
}

impl Penalization {
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn penalize<T: Real>(&self, rho: T) -> T {
        match *self {
            Penalization::Simp { exponent } => rho.powf(T::from_f64(exponent).expect("exponent must fit in T")),
            Penalization::Ramp { q } => {
                let q = T::from_f64(q).expect("q must fit in T");
                rho / (1.0 + q * (1.0 - rho))
            }
            Penalization::Identity => rho,
        }
    }

    /// The derivative `dR/drho`.
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn d_penalize<T: Real>(&self, rho: T) -> T {
        match *self {
            Penalization::Simp { exponent } => {
                let p = T::from_f64(exponent).expect("exponent must fit in T");
                p * rho.powf(p - 1.0)
            }
            Penalization::Ramp { q } => {
                let q = T::from_f64(q).expect("q must fit in T");
                let denominator = 1.0 + q * (1.0 - rho);
                (1.0 + q) / (denominator * denominator)
            }
            Penalization::Identity => 1.0,
        }
    }
}

/// A named topology with a list of penalization functions, selected by function index.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    name: String,
    functions: Vec<Penalization>,
    initial_value: f64,
}

impl Topology {
    pub fn new(name: impl Into<String>, functions: Vec<Penalization>) -> Self {
        Self {
            name: name.into(),
            functions,
            initial_value: 0.5,
        }
    }

    pub fn with_initial_value(self, initial_value: f64) -> Self {
        Self { initial_value, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_value(&self) -> f64 {
        self.initial_value
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    /// # Panics
    ///
    /// Panics if `function` is not a valid function index.
    pub fn penalize(&self, function: usize, rho: f64) -> f64 {
        self.functions[function].penalize(rho)
    }

    /// # Panics
    ///
    /// Panics if `function` is not a valid function index.
    pub fn d_penalize(&self, function: usize, rho: f64) -> f64 {
        self.functions[function].d_penalize(rho)
    }
}

/// The integrand of a topology-weighted measure at a single point.
pub trait MeasureModel: Debug + Send + Sync {
    /// The integrand for topology values `p` (one per topology).
    fn evaluate(&self, p: &[f64], topologies: &[Topology]) -> f64;

    /// Writes the derivative of the integrand w.r.t. each topology value into `out`.
    fn gradient(&self, p: &[f64], topologies: &[Topology], out: &mut [f64]);

    /// The (topology, function) index pairs the model evaluates.
    fn references(&self) -> Vec<(usize, usize)>;
}

/// `R(p_t)` for the material topology `t`.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMeasure {
    pub topology_index: usize,
    pub function_index: usize,
}

impl MeasureModel for VolumeMeasure {
    fn evaluate(&self, p: &[f64], topologies: &[Topology]) -> f64 {
        let t = self.topology_index;
        topologies[t].penalize(self.function_index, p[t])
    }

    fn gradient(&self, p: &[f64], topologies: &[Topology], out: &mut [f64]) {
        out.fill(0.0);
        let t = self.topology_index;
        out[t] = topologies[t].d_penalize(self.function_index, p[t]);
    }

    fn references(&self) -> Vec<(usize, usize)> {
        vec![(self.topology_index, self.function_index)]
    }
}

/// `c R(p_t)` for a single material with parameter value `c`.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyWeightedIntegralMaterial {
    pub parameter_value: f64,
    pub topology_index: usize,
    pub function_index: usize,
}

impl MeasureModel for TopologyWeightedIntegralMaterial {
    fn evaluate(&self, p: &[f64], topologies: &[Topology]) -> f64 {
        let t = self.topology_index;
        self.parameter_value * topologies[t].penalize(self.function_index, p[t])
    }

    fn gradient(&self, p: &[f64], topologies: &[Topology], out: &mut [f64]) {
        out.fill(0.0);
        let t = self.topology_index;
        out[t] = self.parameter_value * topologies[t].d_penalize(self.function_index, p[t]);
    }

    fn references(&self) -> Vec<(usize, usize)> {
        vec![(self.topology_index, self.function_index)]
    }
}

/// A mixture of `n + 1` materials governed by `n` mixture topologies, weighted by the material
/// topology.
///
/// With `R_i = R(p[t_i])` for mixture topology `i` and `c_j` the parameter value of material `j`:
///
/// ```text
/// mix = sum_{i<n} R_i c[m_i] + (1 - sum_{i<n} R_i) c[m_n]
/// g   = R_0(p[t]) * mix
/// ```
///
/// where `t` is the material topology. The gradient is
/// `dg/dp[t] = mix * dR_0(p[t])` and `dg/dp[t_i] = R_0(p[t]) dR_i (c[m_i] - c[m_n])`, the latter
/// replacing (not adding to) earlier entries for the same topology.
///
/// The replacement rule for a mixture topology that coincides with the material topology needs
/// to be confirmed against the underlying material model.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyWeightedIntegralMixture {
    parameter_values: Vec<f64>,
    material_indices: Vec<usize>,
    mixture_topology_indices: Vec<usize>,
    mixture_function_indices: Vec<usize>,
    topology_index: usize,
    function_index: usize,
}

impl TopologyWeightedIntegralMixture {
    pub fn new(
        parameter_values: Vec<f64>,
        material_indices: Vec<usize>,
        mixture_topology_indices: Vec<usize>,
        mixture_function_indices: Vec<usize>,
        topology_index: usize,
        function_index: usize,
    ) -> Result<Self, GraphError> {
        let context = "Topology Weighted Integral Mixture";
        let n = mixture_topology_indices.len();
        if mixture_function_indices.len() != n {
            return Err(GraphError::invalid_configuration(
                context,
                format!("{} topology indices but {} function indices", n, mixture_function_indices.len()),
            ));
        }
        if material_indices.len() != n + 1 {
            return Err(GraphError::invalid_configuration(
                context,
                format!(
                    "{} mixture topologies require {} material indices, got {}",
                    n,
                    n + 1,
                    material_indices.len()
                ),
            ));
        }
        if let Some(m) = material_indices.iter().find(|&&m| m >= parameter_values.len()) {
            return Err(GraphError::invalid_configuration(
                context,
                format!("material index {} out of range for {} materials", m, parameter_values.len()),
            ));
        }
        Ok(Self {
            parameter_values,
            material_indices,
            mixture_topology_indices,
            mixture_function_indices,
            topology_index,
            function_index,
        })
    }

    fn mixture_value(&self, p: &[f64], topologies: &[Topology]) -> f64 {
        let mut mixture = 0.0;
        let mut remainder = 1.0;
        for ((&m, &t), &f) in self
            .material_indices
            .iter()
            .zip(&self.mixture_topology_indices)
            .zip(&self.mixture_function_indices)
        {
            let r = topologies[t].penalize(f, p[t]);
            remainder -= r;
            mixture += r * self.parameter_values[m];
        }
        mixture + remainder * self.last_material_value()
    }

    fn last_material_value(&self) -> f64 {
        let last = self.material_indices[self.mixture_topology_indices.len()];
        self.parameter_values[last]
    }
}

impl MeasureModel for TopologyWeightedIntegralMixture {
    fn evaluate(&self, p: &[f64], topologies: &[Topology]) -> f64 {
        let t = self.topology_index;
        self.mixture_value(p, topologies) * topologies[t].penalize(self.function_index, p[t])
    }

    fn gradient(&self, p: &[f64], topologies: &[Topology], out: &mut [f64]) {
        out.fill(0.0);
        let t = self.topology_index;
        out[t] = self.mixture_value(p, topologies) * topologies[t].d_penalize(self.function_index, p[t]);

        let r0 = topologies[t].penalize(self.function_index, p[t]);
        let last = self.last_material_value();
        for ((&m, &ti), &fi) in self
            .material_indices
            .iter()
            .zip(&self.mixture_topology_indices)
            .zip(&self.mixture_function_indices)
        {
            let dri = topologies[ti].d_penalize(fi, p[ti]);
            out[ti] = r0 * dri * (self.parameter_values[m] - last);
        }
    }

    fn references(&self) -> Vec<(usize, usize)> {
        let mut references = vec![(self.topology_index, self.function_index)];
        references.extend(
            self.mixture_topology_indices
                .iter()
                .copied()
                .zip(self.mixture_function_indices.iter().copied()),
        );
        references
    }
}

/// Measure models per element block.
pub type BlockMeasureMap = BTreeMap<String, Box<dyn MeasureModel>>;

/// Named topology-weighted measures of a discretization.
///
/// Basis function values at quadrature points are given per physics index as a
/// (nodes per cell) x (quadrature points) matrix. Quadrature weights (including the cell
/// measure) are read from a per-workset array with layout [Cell, QuadPoint].
#[derive(Debug)]
pub struct TopologyMeasures {
    topologies: Vec<Topology>,
    basis_at_qps: Vec<DMatrix<f64>>,
    weights_array: String,
    measures: BTreeMap<String, BlockMeasureMap>,
}

impl TopologyMeasures {
    pub fn new(topologies: Vec<Topology>, basis_at_qps: Vec<DMatrix<f64>>) -> Self {
        Self {
            topologies,
            basis_at_qps,
            weights_array: "Weights".to_string(),
            measures: BTreeMap::new(),
        }
    }

    pub fn with_weights_array(self, name: impl Into<String>) -> Self {
        Self {
            weights_array: name.into(),
            ..self
        }
    }

    pub fn topologies(&self) -> &[Topology] {
        &self.topologies
    }

    /// Adds a named measure. Blocks without a model do not contribute to the measure.
    pub fn add_measure(&mut self, name: &str, models: BlockMeasureMap) -> Result<(), GraphError> {
        if self.measures.contains_key(name) {
            return Err(GraphError::invalid_configuration(
                "Linear Measures",
                format!("measure names must be unique, '{}' is given twice", name),
            ));
        }
        for (block, model) in &models {
            for (t, f) in model.references() {
                let valid = self
                    .topologies
                    .get(t)
                    .map_or(false, |topology| f < topology.num_functions());
                if !valid {
                    return Err(GraphError::invalid_configuration(
                        format!("measure '{}' of block '{}'", name, block),
                        format!("invalid topology index {} with function index {}", t, f),
                    ));
                }
            }
        }
        self.measures.insert(name.to_string(), models);
        Ok(())
    }

    /// Integrates a measure over all worksets and sums it over all ranks.
    ///
    /// `values` holds the nodal values of each topology, indexed by global node. If `dmdp` is
    /// given, it receives the rank-local derivative of the measure w.r.t. the nodal values of
    /// each topology.
    pub fn compute_measure(
        &self,
        measure: &str,
        disc: &dyn Discretization,
        values: &[DVector<f64>],
        comm: &dyn Communicator,
        mut dmdp: Option<&mut [DVector<f64>]>,
    ) -> eyre::Result<f64> {
        let models = self
            .measures
            .get(measure)
            .ok_or_else(|| eyre!("Unknown measure '{}'", measure))?;
        let num_topologies = self.topologies.len();
        if values.len() != num_topologies {
            return Err(eyre!("Expected values of {} topologies, got {}", num_topologies, values.len()));
        }
        if let Some(dmdp) = dmdp.as_deref_mut() {
            if dmdp.len() != num_topologies {
                return Err(eyre!("Expected {} derivative vectors, got {}", num_topologies, dmdp.len()));
            }
            for (d, v) in dmdp.iter_mut().zip(values) {
                *d = DVector::zeros(v.len());
            }
        }

        let mut p = vec![0.0; num_topologies];
        let mut drdp = vec![0.0; num_topologies];
        let mut local = 0.0;
        for workset in disc.worksets() {
            let model = match models.get(workset.element_block()) {
                Some(model) => model,
                None => continue,
            };
            let basis = self
                .basis_at_qps
                .get(workset.physics_index())
                .ok_or_else(|| eyre!("No basis values for physics index {}", workset.physics_index()))?;
            let (num_nodes, num_qps) = basis.shape();
            if num_nodes != workset.nodes_per_cell() {
                return Err(eyre!(
                    "Basis values for {} nodes, but workset {} has {} nodes per cell",
                    num_nodes,
                    workset.index(),
                    workset.nodes_per_cell()
                ));
            }
            let weights = workset
                .array(&self.weights_array)
                .ok_or_else(|| eyre!("Workset {} has no array '{}'", workset.index(), self.weights_array))?;
            if weights.len() < workset.num_cells() * num_qps {
                return Err(eyre!(
                    "Array '{}' of workset {} is too short for {} quadrature points per cell",
                    self.weights_array,
                    workset.index(),
                    num_qps
                ));
            }

            for cell in 0..workset.num_cells() {
                let nodes = workset.cell_nodes(cell);
                let mut cell_measure = 0.0;
                for q in 0..num_qps {
                    let w = weights[cell * num_qps + q];
                    p.fill(0.0);
                    for (n, &gid) in nodes.iter().enumerate() {
                        for (p_t, v) in p.iter_mut().zip(values) {
                            let value = v
                                .get(gid)
                                .ok_or_else(|| eyre!("Topology values have no entry for node {}", gid))?;
                            *p_t += value * basis[(n, q)];
                        }
                    }
                    cell_measure += model.evaluate(&p, &self.topologies) * w;

                    if let Some(dmdp) = dmdp.as_deref_mut() {
                        model.gradient(&p, &self.topologies, &mut drdp);
                        for (n, &gid) in nodes.iter().enumerate() {
                            for (d, &dr) in dmdp.iter_mut().zip(&drdp) {
                                d[gid] += dr * basis[(n, q)] * w;
                            }
                        }
                    }
                }
                local += cell_measure;
            }
        }

        let global = comm.sum(local);
        debug!("Measure '{}': local {}, global {}", measure, local, global);
        Ok(global)
    }
}
