//! Field evaluation on worksets of a finite element discretization.
//!
//! Evaluators declare the fields they read and write. A [`FieldManager`](manager::FieldManager)
//! orders them into a dependency graph and runs the graph over every workset of a
//! [`Discretization`](discretization::Discretization), once per evaluation type: residuals,
//! Jacobians, tangents and distributed parameter derivatives share the same evaluator code.

/// Calls a method generic over `<E, S>` with `S` the scalar type of the given class.
macro_rules! dispatch_scalar_type {
    ($class:expr, $E:ty, $this:ident . $method:ident ( $($arg:expr),* $(,)? )) => {
        match $class {
            $crate::field::FieldScalarType::Real => $this.$method::<$E, f64>($($arg),*),
            $crate::field::FieldScalarType::MeshScalar => {
                $this.$method::<$E, <$E as $crate::eval_type::EvaluationType>::MeshScalarT>($($arg),*)
            }
            $crate::field::FieldScalarType::ParamScalar => {
                $this.$method::<$E, <$E as $crate::eval_type::EvaluationType>::ParamScalarT>($($arg),*)
            }
            $crate::field::FieldScalarType::Scalar => {
                $this.$method::<$E, <$E as $crate::eval_type::EvaluationType>::ScalarT>($($arg),*)
            }
        }
    };
}

pub mod comm;
pub mod config;
pub mod discretization;
pub mod error;
pub mod eval_type;
pub mod evaluator;
pub mod evaluators;
pub mod field;
pub mod global;
pub mod inputs;
pub mod layout;
pub mod manager;
pub mod mdfield;
pub mod params;
pub mod responses;
pub mod state;
pub mod topology;
pub mod workset;
pub mod workspace;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate eyre;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use fieldgraph_ad as ad;
pub use fieldgraph_traits as traits;

/// The dual number type used by derivative evaluation types.
pub type FadType = fieldgraph_ad::Fad<f64>;
