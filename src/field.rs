use crate::layout::DataLayout;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::ops::BitOr;
use std::sync::Arc;

/// The scalar class of a field.
///
/// The class selects the concrete scalar type for each evaluation type. Classes are ordered by
/// strength, and `a | b` yields the stronger of the two, i.e. the class able to represent
/// values of both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldScalarType {
    Real,
    MeshScalar,
    ParamScalar,
    Scalar,
}

impl FieldScalarType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldScalarType::Real => "Real",
            FieldScalarType::MeshScalar => "MeshScalar",
            FieldScalarType::ParamScalar => "ParamScalar",
            FieldScalarType::Scalar => "Scalar",
        }
    }
}

impl BitOr for FieldScalarType {
    type Output = FieldScalarType;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.max(rhs)
    }
}

impl Display for FieldScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Identity of a field: its name and layout.
///
/// The scalar class is carried along for storage selection, but does not take part in
/// equality, hashing or ordering.
#[derive(Debug, Clone)]
pub struct FieldTag {
    name: Arc<str>,
    layout: Arc<DataLayout>,
    scalar_type: FieldScalarType,
}

impl FieldTag {
    pub fn new(name: impl AsRef<str>, layout: &Arc<DataLayout>, scalar_type: FieldScalarType) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            layout: Arc::clone(layout),
            scalar_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &Arc<DataLayout> {
        &self.layout
    }

    pub fn scalar_type(&self) -> FieldScalarType {
        self.scalar_type
    }

    /// Same identity, different scalar class.
    pub fn with_scalar_type(&self, scalar_type: FieldScalarType) -> Self {
        Self {
            scalar_type,
            ..self.clone()
        }
    }
}

impl PartialEq for FieldTag {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.layout == other.layout
    }
}

impl Eq for FieldTag {}

impl Hash for FieldTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.layout.hash(state);
    }
}

impl PartialOrd for FieldTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.layout.cmp(&other.layout))
    }
}

impl Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.name, self.layout)
    }
}

/// Types that identify a field.
pub trait AsFieldTag {
    fn field_tag(&self) -> &FieldTag;
}

impl AsFieldTag for FieldTag {
    fn field_tag(&self) -> &FieldTag {
        self
    }
}
