//! Data layouts and the named layout registry.
use crate::error::GraphError;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

/// A logical dimension of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DimTag {
    Cell,
    Side,
    Node,
    QuadPoint,
    Dim,
    VecDim,
    Dummy,
    Named(String),
}

impl Display for DimTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimTag::Cell => write!(f, "Cell"),
            DimTag::Side => write!(f, "Side"),
            DimTag::Node => write!(f, "Node"),
            DimTag::QuadPoint => write!(f, "QuadPoint"),
            DimTag::Dim => write!(f, "Dim"),
            DimTag::VecDim => write!(f, "VecDim"),
            DimTag::Dummy => write!(f, "Dummy"),
            DimTag::Named(name) => write!(f, "{}", name),
        }
    }
}

/// An ordered list of dimension tags with bound extents.
///
/// Storage is row-major: the last dimension is contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataLayout {
    dims: Vec<DimTag>,
    extents: Vec<usize>,
}

impl DataLayout {
    pub fn new(dims: impl IntoIterator<Item = (DimTag, usize)>) -> Self {
        let (dims, extents) = dims.into_iter().unzip();
        Self { dims, extents }
    }

    pub fn dims(&self) -> &[DimTag] {
        &self.dims
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn extent(&self, i: usize) -> usize {
        self.extents[i]
    }

    /// Total number of entries.
    pub fn size(&self) -> usize {
        self.extents.iter().product()
    }

    /// Number of entries per cell, if the first dimension is [`DimTag::Cell`].
    pub fn size_per_cell(&self) -> Option<usize> {
        match self.dims.first() {
            Some(DimTag::Cell) => Some(self.extents[1..].iter().product()),
            _ => None,
        }
    }

    /// Number of entries touched when only the first `num_cells` cells are active.
    pub fn active_size(&self, num_cells: usize) -> usize {
        match self.size_per_cell() {
            Some(per_cell) => per_cell * num_cells.min(self.extents[0]),
            None => self.size(),
        }
    }

    /// Extents of all dimensions after the first `n`.
    pub fn trailing_size(&self, n: usize) -> usize {
        self.extents.iter().skip(n).product()
    }

    /// Checks that the leading dimensions of the layout match `expected`.
    ///
    /// Trailing dimensions beyond `expected` are accepted.
    pub fn expect_leading_dims(&self, field: &str, expected: &[DimTag]) -> Result<(), GraphError> {
        if self.dims.len() < expected.len() || &self.dims[..expected.len()] != expected {
            return Err(GraphError::LayoutMismatch {
                field: field.to_string(),
                expected: format_dims(expected),
                found: self.to_string(),
            });
        }
        Ok(())
    }

    /// Checks that the dimension tags of the layout are exactly `expected`.
    pub fn expect_dims(&self, field: &str, expected: &[DimTag]) -> Result<(), GraphError> {
        if self.dims.as_slice() != expected {
            return Err(GraphError::LayoutMismatch {
                field: field.to_string(),
                expected: format_dims(expected),
                found: self.to_string(),
            });
        }
        Ok(())
    }
}

fn format_dims(dims: &[DimTag]) -> String {
    let names: Vec<_> = dims.iter().map(|d| d.to_string()).collect();
    format!("<{}>", names.join(","))
}

impl Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, (dim, extent)) in self.dims.iter().zip(&self.extents).enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", dim, extent)?;
        }
        write!(f, ">")
    }
}

/// Discretization sizes from which the standard layouts are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDims {
    #[serde(rename = "Workset Size")]
    pub workset_size: usize,
    #[serde(rename = "Nodes Per Cell")]
    pub nodes_per_cell: usize,
    #[serde(rename = "Quad Points Per Cell", default)]
    pub qps_per_cell: usize,
    #[serde(rename = "Spatial Dimension", default = "default_one")]
    pub num_dims: usize,
    #[serde(rename = "Vector Dimension", default = "default_one")]
    pub vec_dim: usize,
    #[serde(rename = "Sides Per Cell", default)]
    pub sides_per_cell: usize,
    #[serde(rename = "Nodes Per Side", default)]
    pub nodes_per_side: usize,
}

fn default_one() -> usize {
    1
}

/// The standard layouts of a discretization, shared by every evaluator referencing them.
#[derive(Debug, Clone)]
pub struct Layouts {
    dims: LayoutDims,
    pub node_scalar: Arc<DataLayout>,
    pub node_vector: Arc<DataLayout>,
    pub node_tensor: Arc<DataLayout>,
    pub qp_scalar: Arc<DataLayout>,
    pub qp_vector: Arc<DataLayout>,
    pub qp_tensor: Arc<DataLayout>,
    pub qp_gradient: Arc<DataLayout>,
    pub node_qp_scalar: Arc<DataLayout>,
    pub node_qp_gradient: Arc<DataLayout>,
    pub cell_scalar: Arc<DataLayout>,
    pub cell_vector: Arc<DataLayout>,
    pub vertices_vector: Arc<DataLayout>,
    pub side_scalar: Arc<DataLayout>,
    pub side_node_scalar: Arc<DataLayout>,
    pub shared_param: Arc<DataLayout>,
    pub dummy: Arc<DataLayout>,
    by_name: FxHashMap<&'static str, Arc<DataLayout>>,
}

impl Layouts {
    pub fn new(dims: LayoutDims) -> Self {
        use DimTag::*;
        let LayoutDims {
            workset_size: c,
            nodes_per_cell: n,
            qps_per_cell: q,
            num_dims: d,
            vec_dim: v,
            sides_per_cell: s,
            nodes_per_side: sn,
        } = dims;
        let make = |dims: Vec<(DimTag, usize)>| Arc::new(DataLayout::new(dims));

        let node_scalar = make(vec![(Cell, c), (Node, n)]);
        let node_vector = make(vec![(Cell, c), (Node, n), (VecDim, v)]);
        let node_tensor = make(vec![(Cell, c), (Node, n), (Dim, d), (Dim, d)]);
        let qp_scalar = make(vec![(Cell, c), (QuadPoint, q)]);
        let qp_vector = make(vec![(Cell, c), (QuadPoint, q), (VecDim, v)]);
        let qp_tensor = make(vec![(Cell, c), (QuadPoint, q), (Dim, d), (Dim, d)]);
        let qp_gradient = make(vec![(Cell, c), (QuadPoint, q), (Dim, d)]);
        let node_qp_scalar = make(vec![(Cell, c), (Node, n), (QuadPoint, q)]);
        let node_qp_gradient = make(vec![(Cell, c), (Node, n), (QuadPoint, q), (Dim, d)]);
        let cell_scalar = make(vec![(Cell, c)]);
        let cell_vector = make(vec![(Cell, c), (VecDim, v)]);
        let vertices_vector = make(vec![(Cell, c), (Node, n), (Dim, d)]);
        let side_scalar = make(vec![(Cell, c), (Side, s)]);
        let side_node_scalar = make(vec![(Cell, c), (Side, s), (Node, sn)]);
        let shared_param = make(vec![(Dim, 1)]);
        let dummy = make(vec![(Dummy, 0)]);

        let by_name = [
            ("Node Scalar", &node_scalar),
            ("Node Vector", &node_vector),
            ("Node Tensor", &node_tensor),
            ("QP Scalar", &qp_scalar),
            ("QP Vector", &qp_vector),
            ("QP Tensor", &qp_tensor),
            ("QP Gradient", &qp_gradient),
            ("Node QP Scalar", &node_qp_scalar),
            ("Node QP Gradient", &node_qp_gradient),
            ("Cell Scalar", &cell_scalar),
            ("Cell Vector", &cell_vector),
            ("Vertices Vector", &vertices_vector),
            ("Side Scalar", &side_scalar),
            ("Side Node Scalar", &side_node_scalar),
            ("Shared Param", &shared_param),
            ("Dummy", &dummy),
        ]
        .into_iter()
        .map(|(name, layout)| (name, Arc::clone(layout)))
        .collect();

        Self {
            dims,
            node_scalar,
            node_vector,
            node_tensor,
            qp_scalar,
            qp_vector,
            qp_tensor,
            qp_gradient,
            node_qp_scalar,
            node_qp_gradient,
            cell_scalar,
            cell_vector,
            vertices_vector,
            side_scalar,
            side_node_scalar,
            shared_param,
            dummy,
            by_name,
        }
    }

    pub fn dims(&self) -> &LayoutDims {
        &self.dims
    }

    pub fn workset_size(&self) -> usize {
        self.dims.workset_size
    }

    /// Looks up a layout by its configuration name, e.g. `"QP Scalar"`.
    pub fn layout_by_name(&self, name: &str) -> Result<Arc<DataLayout>, GraphError> {
        self.by_name.get(name).cloned().ok_or_else(|| {
            GraphError::invalid_configuration("layout", format!("unknown layout name '{}'", name))
        })
    }
}
