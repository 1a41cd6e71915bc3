//! Per-workset contributions and their accumulation into global vectors and matrices.
use crate::comm::Communicator;
use crate::discretization::Discretization;
use crate::eval_type::{EvaluationKind, EvaluationType};
use crate::workset::CellColumns;
use eyre::eyre;
use fieldgraph_traits::FieldScalar;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use std::collections::{BTreeMap, BTreeSet};

/// The value of a scalar response and its gradient w.r.t. the columns seeded in the pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseValue {
    pub value: f64,
    pub gradient: BTreeMap<usize, f64>,
}

/// Contributions of one workset to the global outputs of a pass.
///
/// Worksets never write into shared global storage. Each workset fills its own contributions,
/// which the field manager adds to the [`GlobalOutputs`] in workset order once all worksets
/// are done.
#[derive(Debug, Clone, Default)]
pub struct WorksetContributions {
    residual: Vec<(usize, f64)>,
    derivatives: Vec<(usize, usize, f64)>,
    responses: BTreeMap<String, ResponseValue>,
}

impl WorksetContributions {
    pub fn clear(&mut self) {
        self.residual.clear();
        self.derivatives.clear();
        self.responses.clear();
    }

    pub fn add_residual(&mut self, row: usize, value: f64) {
        self.residual.push((row, value));
    }

    pub fn add_derivative(&mut self, row: usize, col: usize, value: f64) {
        self.derivatives.push((row, col, value));
    }

    /// Adds the value of `value` to residual row `row` and its derivatives to the matching
    /// global columns of the pass.
    pub fn scatter<E, S>(&mut self, row: usize, value: &S, columns: &CellColumns) -> eyre::Result<()>
    where
        E: EvaluationType,
        S: FieldScalar,
    {
        if !value.is_finite() {
            return Err(eyre!("Non-finite contribution {} to residual row {}", value.val(), row));
        }
        self.add_residual(row, value.val());
        for (slot, &d) in value.derivatives().iter().enumerate() {
            if d != 0.0 {
                let col = E::derivative_column(columns, slot)
                    .ok_or_else(|| eyre!("Derivative slot {} of row {} has no global column", slot, row))?;
                self.add_derivative(row, col, d);
            }
        }
        Ok(())
    }

    /// Makes sure a response entry exists, so that it is reported even without contributions.
    pub fn touch_response(&mut self, name: &str) {
        if !self.responses.contains_key(name) {
            self.responses.insert(name.to_string(), ResponseValue::default());
        }
    }

    pub fn add_response(&mut self, name: &str, value: f64) {
        self.touch_response(name);
        if let Some(response) = self.responses.get_mut(name) {
            response.value += value;
        }
    }

    /// Adds a response contribution together with its derivatives.
    pub fn scatter_response<E, S>(&mut self, name: &str, value: &S, columns: &CellColumns) -> eyre::Result<()>
    where
        E: EvaluationType,
        S: FieldScalar,
    {
        if !value.is_finite() {
            return Err(eyre!("Non-finite contribution {} to response '{}'", value.val(), name));
        }
        self.add_response(name, value.val());
        if let Some(response) = self.responses.get_mut(name) {
            for (slot, &d) in value.derivatives().iter().enumerate() {
                if d != 0.0 {
                    let col = E::derivative_column(columns, slot)
                        .ok_or_else(|| eyre!("Derivative slot {} of response '{}' has no global column", slot, name))?;
                    *response.gradient.entry(col).or_insert(0.0) += d;
                }
            }
        }
        Ok(())
    }

    pub fn residual(&self) -> &[(usize, f64)] {
        &self.residual
    }

    pub fn derivatives(&self) -> &[(usize, usize, f64)] {
        &self.derivatives
    }

    pub fn responses(&self) -> &BTreeMap<String, ResponseValue> {
        &self.responses
    }
}

/// Caller-supplied global outputs of evaluation passes.
///
/// Passes add to the stored values. Call [`reset`](Self::reset) to start over.
#[derive(Debug, Clone)]
pub struct GlobalOutputs {
    residual: DVector<f64>,
    jacobian: Option<CsrMatrix<f64>>,
    tangent: Option<DMatrix<f64>>,
    dist_param_deriv: Option<CsrMatrix<f64>>,
    responses: BTreeMap<String, ResponseValue>,
}

impl GlobalOutputs {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            residual: DVector::zeros(num_dofs),
            jacobian: None,
            tangent: None,
            dist_param_deriv: None,
            responses: BTreeMap::new(),
        }
    }

    /// Adds a zero Jacobian with the given pattern.
    pub fn with_jacobian(self, pattern: SparsityPattern) -> Self {
        Self {
            jacobian: Some(zero_csr(pattern)),
            ..self
        }
    }

    /// Adds a zero tangent multivector with one column per tangent direction.
    pub fn with_tangent(self, num_directions: usize) -> Self {
        let num_rows = self.residual.len();
        Self {
            tangent: Some(DMatrix::zeros(num_rows, num_directions)),
            ..self
        }
    }

    /// Adds a zero derivative matrix w.r.t. a distributed parameter with the given pattern.
    pub fn with_dist_param_deriv(self, pattern: SparsityPattern) -> Self {
        Self {
            dist_param_deriv: Some(zero_csr(pattern)),
            ..self
        }
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    pub fn jacobian(&self) -> Option<&CsrMatrix<f64>> {
        self.jacobian.as_ref()
    }

    pub fn tangent(&self) -> Option<&DMatrix<f64>> {
        self.tangent.as_ref()
    }

    pub fn dist_param_deriv(&self) -> Option<&CsrMatrix<f64>> {
        self.dist_param_deriv.as_ref()
    }

    pub fn responses(&self) -> &BTreeMap<String, ResponseValue> {
        &self.responses
    }

    pub fn response(&self, name: &str) -> Option<&ResponseValue> {
        self.responses.get(name)
    }

    /// Zeroes all values while keeping sparsity patterns and dimensions.
    pub fn reset(&mut self) {
        self.residual.fill(0.0);
        if let Some(jacobian) = &mut self.jacobian {
            jacobian.values_mut().fill(0.0);
        }
        if let Some(tangent) = &mut self.tangent {
            tangent.fill(0.0);
        }
        if let Some(dfdp) = &mut self.dist_param_deriv {
            dfdp.values_mut().fill(0.0);
        }
        self.responses.clear();
    }

    /// Checks that every contribution of a workset fits the outputs without modifying them.
    pub fn check_contributions<E: EvaluationType>(&self, contributions: &WorksetContributions) -> eyre::Result<()> {
        let num_rows = self.residual.len();
        if let Some(&(row, _)) = contributions.residual().iter().find(|(row, _)| *row >= num_rows) {
            return Err(eyre!("Residual row {} out of bounds for {} rows", row, num_rows));
        }

        let entries = contributions.derivatives();
        match E::KIND {
            EvaluationKind::Residual => Ok(()),
            EvaluationKind::Jacobian => match &self.jacobian {
                Some(jacobian) => check_csr_entries(jacobian, entries, "Jacobian"),
                None => Ok(()),
            },
            EvaluationKind::DistParamDeriv => match &self.dist_param_deriv {
                Some(dfdp) => check_csr_entries(dfdp, entries, "distributed parameter derivative"),
                None => Ok(()),
            },
            EvaluationKind::Tangent => match &self.tangent {
                Some(tangent) => {
                    let (nrows, ncols) = tangent.shape();
                    match entries.iter().find(|(row, col, _)| *row >= nrows || *col >= ncols) {
                        Some(&(row, col, _)) => Err(eyre!(
                            "Tangent entry ({}, {}) out of bounds for {}x{} multivector",
                            row,
                            col,
                            nrows,
                            ncols
                        )),
                        None => Ok(()),
                    }
                }
                None => Ok(()),
            },
        }
    }

    /// Adds the residual and derivative contributions of one workset.
    ///
    /// Derivatives are routed by the evaluation kind. Passes without a matching output
    /// matrix discard them. Responses are not touched; see [`add_responses`](Self::add_responses).
    pub fn accumulate<E: EvaluationType>(&mut self, contributions: &WorksetContributions) -> eyre::Result<()> {
        let num_rows = self.residual.len();
        for &(row, value) in contributions.residual() {
            let entry = self
                .residual
                .get_mut(row)
                .ok_or_else(|| eyre!("Residual row {} out of bounds for {} rows", row, num_rows))?;
            *entry += value;
        }

        match E::KIND {
            EvaluationKind::Residual => {}
            EvaluationKind::Jacobian => {
                if let Some(jacobian) = &mut self.jacobian {
                    add_to_csr(jacobian, contributions.derivatives(), "Jacobian")?;
                }
            }
            EvaluationKind::DistParamDeriv => {
                if let Some(dfdp) = &mut self.dist_param_deriv {
                    add_to_csr(dfdp, contributions.derivatives(), "distributed parameter derivative")?;
                }
            }
            EvaluationKind::Tangent => {
                if let Some(tangent) = &mut self.tangent {
                    let (nrows, ncols) = tangent.shape();
                    for &(row, col, value) in contributions.derivatives() {
                        if row >= nrows || col >= ncols {
                            return Err(eyre!(
                                "Tangent entry ({}, {}) out of bounds for {}x{} multivector",
                                row,
                                col,
                                nrows,
                                ncols
                            ));
                        }
                        tangent[(row, col)] += value;
                    }
                }
            }
        }
        Ok(())
    }

    /// Adds reduced responses of a pass.
    pub fn add_responses(&mut self, responses: &BTreeMap<String, ResponseValue>) {
        merge_responses(&mut self.responses, responses);
    }
}

pub(crate) fn merge_responses(target: &mut BTreeMap<String, ResponseValue>, source: &BTreeMap<String, ResponseValue>) {
    for (name, response) in source {
        let entry = target.entry(name.clone()).or_default();
        entry.value += response.value;
        for (&col, &d) in &response.gradient {
            *entry.gradient.entry(col).or_insert(0.0) += d;
        }
    }
}

/// Sums response values over all ranks.
///
/// Gradients stay rank-local, since each rank only holds entries for the columns it touches.
pub(crate) fn reduce_responses(responses: &mut BTreeMap<String, ResponseValue>, comm: &dyn Communicator) {
    let mut values: Vec<f64> = responses.values().map(|r| r.value).collect();
    comm.sum_all(&mut values);
    for (response, value) in responses.values_mut().zip(values) {
        response.value = value;
    }
}

fn zero_csr(pattern: SparsityPattern) -> CsrMatrix<f64> {
    let nnz = pattern.nnz();
    CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
        .expect("Number of values always matches the number of non-zeros of the pattern")
}

fn check_csr_entries(matrix: &CsrMatrix<f64>, entries: &[(usize, usize, f64)], what: &str) -> eyre::Result<()> {
    let nrows = matrix.nrows();
    for &(row, col, _) in entries {
        if row >= nrows {
            return Err(eyre!("Row {} out of bounds for {} with {} rows", row, what, nrows));
        }
        if matrix.row(row).col_indices().binary_search(&col).is_err() {
            return Err(eyre!("Entry ({}, {}) is not part of the {} sparsity pattern", row, col, what));
        }
    }
    Ok(())
}

fn add_to_csr(matrix: &mut CsrMatrix<f64>, entries: &[(usize, usize, f64)], what: &str) -> eyre::Result<()> {
    let nrows = matrix.nrows();
    for &(row, col, value) in entries {
        if row >= nrows {
            return Err(eyre!("Row {} out of bounds for {} with {} rows", row, what, nrows));
        }
        let mut csr_row = matrix.row_mut(row);
        let (cols, values) = csr_row.cols_and_values_mut();
        let idx = cols
            .binary_search(&col)
            .map_err(|_| eyre!("Entry ({}, {}) is not part of the {} sparsity pattern", row, col, what))?;
        values[idx] += value;
    }
    Ok(())
}

fn pattern_from_entries(nrows: usize, ncols: usize, entries: BTreeSet<(usize, usize)>) -> SparsityPattern {
    let mut offsets = Vec::with_capacity(nrows + 1);
    let mut column_indices = Vec::with_capacity(entries.len());

    offsets.push(0);
    for (i, j) in entries {
        while i + 1 > offsets.len() {
            // Handles consecutive empty rows
            offsets.push(column_indices.len());
        }
        column_indices.push(j);
    }

    while offsets.len() < nrows + 1 {
        offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(nrows, ncols, offsets, column_indices)
        .expect("Entries are sorted, unique and in bounds")
}

/// The Jacobian pattern of a discretization: all pairs of degrees of freedom sharing a cell.
pub fn assemble_dof_pattern(disc: &dyn Discretization) -> SparsityPattern {
    let mut entries = BTreeSet::new();
    for workset in disc.worksets() {
        for cell in 0..workset.num_cells() {
            let dofs = workset.cell_dofs(cell);
            for &i in dofs {
                for &j in dofs {
                    entries.insert((i, j));
                }
            }
        }
    }
    pattern_from_entries(disc.num_dofs(), disc.num_dofs(), entries)
}

/// The pattern of derivatives w.r.t. a nodal distributed parameter: degrees of freedom times
/// nodes sharing a cell.
pub fn assemble_dof_node_pattern(disc: &dyn Discretization) -> SparsityPattern {
    let mut entries = BTreeSet::new();
    for workset in disc.worksets() {
        for cell in 0..workset.num_cells() {
            for &i in workset.cell_dofs(cell) {
                for &j in workset.cell_nodes(cell) {
                    entries.insert((i, j));
                }
            }
        }
    }
    pattern_from_entries(disc.num_dofs(), disc.num_nodes(), entries)
}
