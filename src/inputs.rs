use eyre::eyre;
use nalgebra::{DMatrix, DVector};
use rustc_hash::FxHashMap;

/// Which solution vector a gathered value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolutionKind {
    X,
    XDot,
    XDotDot,
}

/// The solution and parameter data bound for one evaluation pass.
///
/// The Jacobian assembled in a Jacobian pass is `alpha dF/dxdot + beta dF/dx + omega dF/dxdotdot`.
/// Tangent directions are the columns of `vx` followed by the listed scalar parameters.
#[derive(Debug, Clone)]
pub struct EvaluationInputs<'a> {
    time: f64,
    x: &'a DVector<f64>,
    xdot: Option<&'a DVector<f64>>,
    xdotdot: Option<&'a DVector<f64>>,
    alpha: f64,
    beta: f64,
    omega: f64,
    vx: Option<&'a DMatrix<f64>>,
    tangent_params: Vec<String>,
    distributed_params: FxHashMap<String, &'a DVector<f64>>,
    active_distributed_param: Option<String>,
}

impl<'a> EvaluationInputs<'a> {
    pub fn new(x: &'a DVector<f64>) -> Self {
        Self {
            time: 0.0,
            x,
            xdot: None,
            xdotdot: None,
            alpha: 0.0,
            beta: 1.0,
            omega: 0.0,
            vx: None,
            tangent_params: Vec::new(),
            distributed_params: FxHashMap::default(),
            active_distributed_param: None,
        }
    }

    pub fn with_time(self, time: f64) -> Self {
        Self { time, ..self }
    }

    pub fn with_xdot(self, xdot: &'a DVector<f64>) -> Self {
        Self {
            xdot: Some(xdot),
            ..self
        }
    }

    pub fn with_xdotdot(self, xdotdot: &'a DVector<f64>) -> Self {
        Self {
            xdotdot: Some(xdotdot),
            ..self
        }
    }

    pub fn with_coefficients(self, alpha: f64, beta: f64, omega: f64) -> Self {
        Self {
            alpha,
            beta,
            omega,
            ..self
        }
    }

    /// Sets the tangent directions: the columns of `vx` (if any), then one direction per parameter.
    pub fn with_tangent_directions<S: AsRef<str>>(self, vx: Option<&'a DMatrix<f64>>, params: &[S]) -> Self {
        Self {
            vx,
            tangent_params: params.iter().map(|p| p.as_ref().to_string()).collect(),
            ..self
        }
    }

    pub fn with_distributed_parameter(mut self, name: impl Into<String>, values: &'a DVector<f64>) -> Self {
        self.distributed_params.insert(name.into(), values);
        self
    }

    /// Selects the distributed parameter that derivatives are taken with respect to.
    pub fn with_active_distributed_parameter(self, name: impl Into<String>) -> Self {
        Self {
            active_distributed_param: Some(name.into()),
            ..self
        }
    }

    /// Checks that all bound solution vectors and tangent directions have `num_dofs` rows.
    pub fn check_sizes(&self, num_dofs: usize) -> eyre::Result<()> {
        let vectors = [("x", Some(self.x)), ("xdot", self.xdot), ("xdotdot", self.xdotdot)];
        for (name, vector) in vectors {
            if let Some(vector) = vector {
                if vector.len() != num_dofs {
                    return Err(eyre!("{} has {} entries, expected {}", name, vector.len(), num_dofs));
                }
            }
        }
        if let Some(vx) = self.vx {
            if vx.nrows() != num_dofs {
                return Err(eyre!("Tangent directions have {} rows, expected {}", vx.nrows(), num_dofs));
            }
        }
        Ok(())
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn x(&self) -> &DVector<f64> {
        self.x
    }

    pub fn solution(&self, kind: SolutionKind) -> Option<&DVector<f64>> {
        match kind {
            SolutionKind::X => Some(self.x),
            SolutionKind::XDot => self.xdot,
            SolutionKind::XDotDot => self.xdotdot,
        }
    }

    /// The Jacobian coefficient belonging to the given solution vector.
    pub fn coefficient(&self, kind: SolutionKind) -> f64 {
        match kind {
            SolutionKind::X => self.beta,
            SolutionKind::XDot => self.alpha,
            SolutionKind::XDotDot => self.omega,
        }
    }

    pub fn vx(&self) -> Option<&DMatrix<f64>> {
        self.vx
    }

    pub fn num_vx_directions(&self) -> usize {
        self.vx.map(|vx| vx.ncols()).unwrap_or(0)
    }

    pub fn num_tangent_directions(&self) -> usize {
        self.num_vx_directions() + self.tangent_params.len()
    }

    pub fn tangent_params(&self) -> &[String] {
        &self.tangent_params
    }

    /// The derivative slot of a scalar parameter in a tangent pass.
    pub fn tangent_param_slot(&self, name: &str) -> Option<usize> {
        self.tangent_params
            .iter()
            .position(|p| p == name)
            .map(|k| self.num_vx_directions() + k)
    }

    pub fn distributed_parameter(&self, name: &str) -> Option<&DVector<f64>> {
        self.distributed_params.get(name).copied()
    }

    pub fn active_distributed_parameter(&self) -> Option<&str> {
        self.active_distributed_param.as_deref()
    }
}
