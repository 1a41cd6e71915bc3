//! Helpers shared by the tests and benchmarks of the workspace.
use nalgebra::{DMatrix, DVector};

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// A structured mesh of bilinear quadrilaterals covering the unit square, as flat arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadMesh {
    /// Two coordinates per vertex. Vertex `(i, j)` has index `j * (nx + 1) + i`.
    pub vertices: Vec<f64>,
    /// Four vertex indices per cell, counter-clockwise starting at the lower left corner.
    pub connectivity: Vec<usize>,
    pub nx: usize,
    pub ny: usize,
}

/// Generates a uniform `nx` x `ny` quad mesh of the unit square.
pub fn unit_square_quad_mesh(nx: usize, ny: usize) -> QuadMesh {
    let hx = 1.0 / nx.max(1) as f64;
    let hy = 1.0 / ny.max(1) as f64;
    let vertex = |i: usize, j: usize| j * (nx + 1) + i;

    let mut vertices = Vec::with_capacity(2 * (nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            vertices.push(i as f64 * hx);
            vertices.push(j as f64 * hy);
        }
    }

    let mut connectivity = Vec::with_capacity(4 * nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            connectivity.extend_from_slice(&[vertex(i, j), vertex(i + 1, j), vertex(i + 1, j + 1), vertex(i, j + 1)]);
        }
    }

    QuadMesh {
        vertices,
        connectivity,
        nx,
        ny,
    }
}

impl QuadMesh {
    pub fn num_cells(&self) -> usize {
        self.nx * self.ny
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 2
    }

    pub fn cell_area(&self) -> f64 {
        1.0 / (self.num_cells() as f64)
    }

    /// Basis function values laid out (cell, node, qp) for every cell of the mesh.
    pub fn basis_array(&self) -> Vec<f64> {
        let table = q4_basis_at_gauss_points();
        let per_cell: Vec<f64> = (0..4)
            .flat_map(|n| (0..4).map(move |q| (n, q)))
            .map(|(n, q)| table[(n, q)])
            .collect();
        per_cell.repeat(self.num_cells())
    }

    /// Quadrature weights times the Jacobian determinant, laid out (cell, qp).
    pub fn weights_array(&self) -> Vec<f64> {
        // 2x2 Gauss weights are 1 and the reference square has area 4
        vec![self.cell_area() / 4.0; 4 * self.num_cells()]
    }
}

/// The 2x2 Gauss points of the reference square [-1, 1]^2.
pub fn q4_gauss_points() -> [[f64; 2]; 4] {
    let a = 1.0 / f64::sqrt(3.0);
    [[-a, -a], [a, -a], [a, a], [-a, a]]
}

/// Bilinear basis functions evaluated at the 2x2 Gauss points, one row per node and one
/// column per point.
pub fn q4_basis_at_gauss_points() -> DMatrix<f64> {
    let corners = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];
    let points = q4_gauss_points();
    DMatrix::from_fn(4, 4, |n, q| {
        let [xi, eta] = points[q];
        0.25 * (1.0 + xi * corners[n][0]) * (1.0 + eta * corners[n][1])
    })
}

/// Approximates the Jacobian of `f: R^n -> R^m` at `x` with central finite differences of
/// step `h`.
///
/// The vector `x` is used for intermediate evaluations, but its content is unchanged upon
/// returning.
pub fn approximate_jacobian_fd(
    m: usize,
    mut f: impl FnMut(&DVector<f64>, &mut DVector<f64>),
    x: &mut DVector<f64>,
    h: f64,
) -> DMatrix<f64> {
    let n = x.len();
    let mut jacobian = DMatrix::zeros(m, n);
    let mut f_plus = DVector::zeros(m);
    let mut f_minus = DVector::zeros(m);

    for i in 0..n {
        let xi = x[i];
        x[i] = xi + h;
        f(x, &mut f_plus);
        x[i] = xi - h;
        f(x, &mut f_minus);
        x[i] = xi;

        let mut df_dxi = jacobian.column_mut(i);
        df_dxi.copy_from(&f_plus);
        df_dxi -= &f_minus;
        df_dxi /= 2.0 * h;
    }
    jacobian
}
