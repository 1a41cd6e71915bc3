//! The contract between evaluators and the field manager.
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::field::{AsFieldTag, FieldScalarType, FieldTag};
use crate::global::WorksetContributions;
use crate::inputs::EvaluationInputs;
use crate::mdfield::{AnyField, FieldId, FieldStore, MDField};
use crate::params::ParameterLibrary;
use crate::state::StateManager;
use crate::workset::Workset;
use crate::workspace::Workspace;
use rustc_hash::FxHashMap;
use std::any::TypeId;
use std::marker::PhantomData;

/// The fields an evaluator reads and writes.
#[derive(Debug, Clone, Default)]
pub struct FieldDeclarations {
    dependent: Vec<FieldTag>,
    evaluated: Vec<FieldTag>,
    responses: Vec<String>,
}

impl FieldDeclarations {
    pub fn depends_on(&mut self, field: &impl AsFieldTag) {
        let tag = field.field_tag();
        if !self.dependent.contains(tag) {
            self.dependent.push(tag.clone());
        }
    }

    pub fn evaluates(&mut self, field: &impl AsFieldTag) {
        let tag = field.field_tag();
        if !self.evaluated.contains(tag) {
            self.evaluated.push(tag.clone());
        }
    }

    /// Declares that the evaluator adds to the named global response.
    pub fn contributes_to_response(&mut self, name: &str) {
        if !self.responses.iter().any(|r| r == name) {
            self.responses.push(name.to_string());
        }
    }

    pub fn dependent(&self) -> &[FieldTag] {
        &self.dependent
    }

    pub fn evaluated(&self) -> &[FieldTag] {
        &self.evaluated
    }

    pub fn responses(&self) -> &[String] {
        &self.responses
    }
}

/// A unit of computation over a workset.
///
/// The same evaluator body runs for every evaluation type `E`: fields of class
/// [`FieldScalarType::Scalar`] hold `E::ScalarT`, which carries derivatives whenever the pass
/// needs them.
///
/// The manager calls [`declare`](Evaluator::declare) once at registration,
/// [`post_registration_setup`](Evaluator::post_registration_setup) once after the graph is
/// final, and [`evaluate_fields`](Evaluator::evaluate_fields) once per workset and pass. An
/// evaluator must produce identical outputs for identical inputs, and may only keep state
/// across worksets through the [`StateManager`].
pub trait Evaluator<E: EvaluationType>: Send + Sync {
    fn name(&self) -> &str;

    fn declare(&self, fields: &mut FieldDeclarations);

    /// Binds field handles and precomputes workset-independent data.
    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError>;

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()>;
}

/// Storage assignment of a field in the execution plan.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldBinding {
    pub id: FieldId,
    pub scalar_type: FieldScalarType,
}

/// Data available to evaluators during post-registration setup.
pub struct SetupData<'a, E> {
    bindings: &'a FxHashMap<FieldTag, FieldBinding>,
    parameters: &'a ParameterLibrary,
    states: Option<&'a StateManager>,
    marker: PhantomData<E>,
}

impl<'a, E: EvaluationType> SetupData<'a, E> {
    pub(crate) fn new(
        bindings: &'a FxHashMap<FieldTag, FieldBinding>,
        parameters: &'a ParameterLibrary,
        states: Option<&'a StateManager>,
    ) -> Self {
        Self {
            bindings,
            parameters,
            states,
            marker: PhantomData,
        }
    }

    fn lookup(&self, tag: &FieldTag) -> Result<FieldBinding, GraphError> {
        if let Some(binding) = self.bindings.get(tag) {
            return Ok(*binding);
        }
        let same_name = self.bindings.keys().find(|other| other.name() == tag.name());
        Err(match same_name {
            Some(other) => GraphError::LayoutMismatch {
                field: tag.name().to_string(),
                expected: tag.layout().to_string(),
                found: other.layout().to_string(),
            },
            None => GraphError::MissingProvider {
                field: tag.to_string(),
                required_by: "post-registration setup".to_string(),
            },
        })
    }

    /// Binds a typed handle to its storage.
    ///
    /// Fails with [`GraphError::ScalarTypeMismatch`] if `S` is not the type stored for the
    /// field in this evaluation type.
    pub fn bind<S: 'static>(&self, field: &mut MDField<S>) -> Result<(), GraphError> {
        let binding = self.lookup(field.tag())?;
        if TypeId::of::<S>() != E::scalar_type_id(binding.scalar_type) {
            return Err(GraphError::ScalarTypeMismatch {
                field: field.tag().to_string(),
                storage: E::scalar_type_name(binding.scalar_type).to_string(),
            });
        }
        field.bind(binding.id);
        Ok(())
    }

    /// Binds a runtime-typed handle, adopting the scalar class of the storage.
    pub fn bind_any(&self, field: &mut AnyField) -> Result<(), GraphError> {
        let binding = self.lookup(field.tag())?;
        field.bind(binding.id, binding.scalar_type);
        Ok(())
    }

    /// The scalar class of the storage bound to a field.
    pub fn storage_class(&self, field: &impl AsFieldTag) -> Result<FieldScalarType, GraphError> {
        self.lookup(field.field_tag()).map(|b| b.scalar_type)
    }

    pub fn parameters(&self) -> &ParameterLibrary {
        self.parameters
    }

    pub fn states(&self) -> Option<&StateManager> {
        self.states
    }
}

/// Data available to an evaluator while it evaluates one workset.
pub struct EvalData<'a, 'b> {
    pub workset: &'a Workset,
    pub inputs: &'a EvaluationInputs<'b>,
    pub fields: &'a FieldStore,
    /// Per-thread scratch storage, reused across worksets.
    pub scratch: &'a mut Workspace,
    pub contributions: &'a mut WorksetContributions,
    pub parameters: &'a ParameterLibrary,
    pub states: Option<&'a StateManager>,
}

impl<'a, 'b> EvalData<'a, 'b> {
    pub fn num_cells(&self) -> usize {
        self.workset.num_cells()
    }

    pub fn states(&self) -> eyre::Result<&'a StateManager> {
        self.states
            .ok_or_else(|| eyre::eyre!("No state manager is attached to the field manager"))
    }
}
