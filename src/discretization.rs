//! The discretization interface consumed by the field manager.
use crate::workset::{SideEntry, Workset};
use eyre::eyre;
use log::debug;

/// A mesh decomposed into worksets, with a global numbering of nodes and degrees of freedom.
pub trait Discretization: Sync {
    fn worksets(&self) -> &[Workset];

    fn num_dofs(&self) -> usize {
        self.num_nodes() * self.num_eq()
    }

    fn num_nodes(&self) -> usize;

    /// Number of equations (degrees of freedom) per node.
    fn num_eq(&self) -> usize;
}

/// A discretization built from flat vertex and connectivity arrays.
///
/// Cells are split into consecutive worksets of at most `workset_size` cells. Degrees of
/// freedom are numbered `node * num_eq + eq`.
#[derive(Debug, Clone)]
pub struct MeshDiscretization {
    worksets: Vec<Workset>,
    num_nodes: usize,
    num_eq: usize,
    workset_size: usize,
    num_cells: usize,
}

impl MeshDiscretization {
    /// Creates a discretization.
    ///
    /// `vertices` holds `spatial_dim` coordinates per node and `connectivity` holds
    /// `nodes_per_cell` node indices per cell.
    pub fn new(
        spatial_dim: usize,
        vertices: &[f64],
        nodes_per_cell: usize,
        connectivity: &[usize],
        num_eq: usize,
        workset_size: usize,
    ) -> eyre::Result<Self> {
        if spatial_dim == 0 || vertices.len() % spatial_dim != 0 {
            return Err(eyre!(
                "Vertex array of length {} does not hold {}-dimensional points",
                vertices.len(),
                spatial_dim
            ));
        }
        if nodes_per_cell == 0 || connectivity.len() % nodes_per_cell != 0 {
            return Err(eyre!(
                "Connectivity of length {} does not hold cells with {} nodes",
                connectivity.len(),
                nodes_per_cell
            ));
        }
        if workset_size == 0 {
            return Err(eyre!("Workset size must be positive"));
        }

        let num_nodes = vertices.len() / spatial_dim;
        if let Some(&node) = connectivity.iter().find(|&&n| n >= num_nodes) {
            return Err(eyre!("Connectivity references node {} of a mesh with {} nodes", node, num_nodes));
        }

        let num_cells = connectivity.len() / nodes_per_cell;
        let mut worksets = Vec::new();
        for (index, chunk) in connectivity.chunks(workset_size * nodes_per_cell).enumerate() {
            let coordinates = chunk
                .iter()
                .flat_map(|&node| vertices[spatial_dim * node..spatial_dim * (node + 1)].iter().copied())
                .collect();
            let workset = Workset::new(index, nodes_per_cell, num_eq, chunk.to_vec())?
                .with_coordinates(spatial_dim, coordinates)?;
            worksets.push(workset);
        }
        debug!(
            "Split {} cells into {} worksets of at most {} cells",
            num_cells,
            worksets.len(),
            workset_size
        );

        Ok(Self {
            worksets,
            num_nodes,
            num_eq,
            workset_size,
            num_cells,
        })
    }

    pub fn workset_size(&self) -> usize {
        self.workset_size
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    /// Workset index and local cell index of a global cell.
    pub fn locate_cell(&self, cell: usize) -> Option<(usize, usize)> {
        (cell < self.num_cells).then(|| (cell / self.workset_size, cell % self.workset_size))
    }

    pub fn with_element_block(mut self, name: &str, physics_index: usize) -> Self {
        self.worksets = self
            .worksets
            .into_iter()
            .map(|ws| ws.with_element_block(name, physics_index))
            .collect();
        self
    }

    /// Adds a side set given as (global cell, local side) pairs.
    pub fn with_side_set(mut self, name: &str, sides: &[(usize, usize)]) -> eyre::Result<Self> {
        let mut per_workset = vec![Vec::new(); self.worksets.len()];
        for &(cell, side) in sides {
            let (ws, local) = self
                .locate_cell(cell)
                .ok_or_else(|| eyre!("Side set '{}' references cell {} of a mesh with {} cells", name, cell, self.num_cells))?;
            per_workset[ws].push(SideEntry { cell: local, side });
        }
        for (workset, entries) in self.worksets.iter_mut().zip(per_workset) {
            if !entries.is_empty() {
                workset.add_side_set(name, entries)?;
            }
        }
        Ok(self)
    }

    /// Adds a named per-cell array holding `values_per_cell` values per cell.
    pub fn with_cell_array(mut self, name: &str, values_per_cell: usize, values: &[f64]) -> eyre::Result<Self> {
        if values.len() != values_per_cell * self.num_cells {
            return Err(eyre!(
                "Cell array '{}' has {} values, expected {}",
                name,
                values.len(),
                values_per_cell * self.num_cells
            ));
        }
        let chunk_len = (values_per_cell * self.workset_size).max(1);
        for (workset, chunk) in self.worksets.iter_mut().zip(values.chunks(chunk_len)) {
            workset.add_array(name, chunk.to_vec());
        }
        Ok(self)
    }
}

impl Discretization for MeshDiscretization {
    fn worksets(&self) -> &[Workset] {
        &self.worksets
    }

    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn num_eq(&self) -> usize {
        self.num_eq
    }
}
