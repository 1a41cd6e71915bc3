//! Worksets: batches of cells processed together by an evaluator chain.
use eyre::eyre;
use rustc_hash::FxHashMap;

/// A side of a cell that belongs to a side set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SideEntry {
    /// Cell index local to the workset.
    pub cell: usize,
    /// Side index local to the cell.
    pub side: usize,
}

/// Global columns associated with the local derivative slots of one cell.
#[derive(Debug, Clone, Copy)]
pub struct CellColumns<'a> {
    /// Global degrees of freedom, ordered `node * num_eq + eq`.
    pub dofs: &'a [usize],
    /// Global node indices.
    pub nodes: &'a [usize],
}

/// A batch of cells with connectivity, coordinates, side sets and named raw arrays.
///
/// All per-cell arrays are stored row-major with the cell index outermost.
#[derive(Debug, Clone)]
pub struct Workset {
    index: usize,
    num_cells: usize,
    nodes_per_cell: usize,
    num_eq: usize,
    spatial_dim: usize,
    physics_index: usize,
    element_block: String,
    cell_nodes: Vec<usize>,
    cell_dofs: Vec<usize>,
    coordinates: Vec<f64>,
    side_sets: FxHashMap<String, Vec<SideEntry>>,
    arrays: FxHashMap<String, Vec<f64>>,
}

impl Workset {
    /// Creates a workset from cell-to-node connectivity.
    ///
    /// Degrees of freedom are numbered `node * num_eq + eq`. Coordinates start out as zeros.
    pub fn new(index: usize, nodes_per_cell: usize, num_eq: usize, cell_nodes: Vec<usize>) -> eyre::Result<Self> {
        if nodes_per_cell == 0 || cell_nodes.len() % nodes_per_cell != 0 {
            return Err(eyre!(
                "Connectivity of length {} is not a multiple of {} nodes per cell",
                cell_nodes.len(),
                nodes_per_cell
            ));
        }
        let num_cells = cell_nodes.len() / nodes_per_cell;
        let cell_dofs = cell_nodes
            .iter()
            .flat_map(|node| (0..num_eq).map(move |eq| node * num_eq + eq))
            .collect();
        Ok(Self {
            index,
            num_cells,
            nodes_per_cell,
            num_eq,
            spatial_dim: 0,
            physics_index: 0,
            element_block: String::new(),
            cell_nodes,
            cell_dofs,
            coordinates: Vec::new(),
            side_sets: FxHashMap::default(),
            arrays: FxHashMap::default(),
        })
    }

    pub fn with_coordinates(mut self, spatial_dim: usize, coordinates: Vec<f64>) -> eyre::Result<Self> {
        let expected = self.num_cells * self.nodes_per_cell * spatial_dim;
        if coordinates.len() != expected {
            return Err(eyre!(
                "Expected {} coordinate entries for workset {}, got {}",
                expected,
                self.index,
                coordinates.len()
            ));
        }
        self.spatial_dim = spatial_dim;
        self.coordinates = coordinates;
        Ok(self)
    }

    pub fn with_element_block(mut self, name: impl Into<String>, physics_index: usize) -> Self {
        self.element_block = name.into();
        self.physics_index = physics_index;
        self
    }

    pub fn with_side_set(mut self, name: impl Into<String>, sides: Vec<SideEntry>) -> eyre::Result<Self> {
        self.add_side_set(name, sides)?;
        Ok(self)
    }

    /// Attaches a named raw array, e.g. precomputed basis function values or quadrature weights.
    pub fn with_array(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.add_array(name, values);
        self
    }

    pub fn add_side_set(&mut self, name: impl Into<String>, sides: Vec<SideEntry>) -> eyre::Result<()> {
        let name = name.into();
        if let Some(entry) = sides.iter().find(|s| s.cell >= self.num_cells) {
            return Err(eyre!(
                "Side set '{}' references cell {} in workset {} with {} cells",
                name,
                entry.cell,
                self.index,
                self.num_cells
            ));
        }
        self.side_sets.insert(name, sides);
        Ok(())
    }

    pub fn add_array(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.arrays.insert(name.into(), values);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn nodes_per_cell(&self) -> usize {
        self.nodes_per_cell
    }

    pub fn num_eq(&self) -> usize {
        self.num_eq
    }

    pub fn spatial_dim(&self) -> usize {
        self.spatial_dim
    }

    pub fn physics_index(&self) -> usize {
        self.physics_index
    }

    pub fn element_block(&self) -> &str {
        &self.element_block
    }

    pub fn cell_nodes(&self, cell: usize) -> &[usize] {
        let n = self.nodes_per_cell;
        &self.cell_nodes[n * cell..n * (cell + 1)]
    }

    pub fn cell_dofs(&self, cell: usize) -> &[usize] {
        let n = self.nodes_per_cell * self.num_eq;
        &self.cell_dofs[n * cell..n * (cell + 1)]
    }

    pub fn columns(&self, cell: usize) -> CellColumns<'_> {
        CellColumns {
            dofs: self.cell_dofs(cell),
            nodes: self.cell_nodes(cell),
        }
    }

    /// Coordinates ordered (cell, node, dim).
    pub fn coordinates(&self) -> &[f64] {
        &self.coordinates
    }

    pub fn side_set(&self, name: &str) -> Option<&[SideEntry]> {
        self.side_sets.get(name).map(Vec::as_slice)
    }

    pub fn side_set_names(&self) -> impl Iterator<Item = &str> {
        self.side_sets.keys().map(String::as_str)
    }

    pub fn array(&self, name: &str) -> Option<&[f64]> {
        self.arrays.get(name).map(Vec::as_slice)
    }
}
