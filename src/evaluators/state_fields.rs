use super::bind_promotable;
use crate::error::GraphError;
use crate::eval_type::{EvaluationKind, EvaluationType};
use crate::evaluator::{EvalData, Evaluator, FieldDeclarations, SetupData};
use crate::field::{FieldScalarType, FieldTag};
use crate::layout::{DataLayout, DimTag};
use crate::mdfield::AnyField;
use crate::state::StateManager;
use eyre::eyre;
use log::trace;
use std::sync::Arc;

fn require_states<'a, E: EvaluationType>(setup: &'a SetupData<E>, context: &str) -> Result<&'a StateManager, GraphError> {
    setup
        .states()
        .ok_or_else(|| GraphError::invalid_configuration(context, "no state manager is attached to the field manager"))
}

/// Loads a cell state into a field with the layout of the state.
///
/// The state is registered with initial value `init` during setup if it does not exist yet.
#[derive(Debug, Clone)]
pub struct LoadStateField {
    name: String,
    state: String,
    init: f64,
    field: AnyField,
}

impl LoadStateField {
    pub fn new(field: &str, state: &str, layout: &Arc<DataLayout>, class: FieldScalarType, init: f64) -> Self {
        Self {
            name: format!("Load State Field {}", state),
            state: state.to_string(),
            init,
            field: AnyField::new(field, layout, class),
        }
    }

    pub fn field(&self) -> &AnyField {
        &self.field
    }
}

impl<E: EvaluationType> Evaluator<E> for LoadStateField {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.evaluates(&self.field);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        setup.bind_any(&mut self.field)?;
        require_states(setup, &self.name)?.register_state(&self.state, self.field.layout(), self.init, false)
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        let fields = data.fields;
        data.states()?
            .read(data.workset.index(), &self.state, |values| fields.write_reals::<E>(&self.field, values))?
    }
}

/// Copies a field into a cell state of the same layout at the end of Residual passes.
///
/// Other evaluation types leave the state untouched. The evaluator evaluates a dummy field named
/// `"Save <state>"`, which must be required for the state to be saved.
#[derive(Debug, Clone)]
pub struct SaveStateField {
    name: String,
    state: String,
    save_old: bool,
    field: AnyField,
    save_tag: FieldTag,
}

impl SaveStateField {
    pub fn new(
        field: &str,
        state: &str,
        layout: &Arc<DataLayout>,
        dummy: &Arc<DataLayout>,
        class: FieldScalarType,
        save_old: bool,
    ) -> Self {
        Self {
            name: format!("Save State Field {}", state),
            state: state.to_string(),
            save_old,
            field: AnyField::new(field, layout, class),
            save_tag: FieldTag::new(format!("Save {}", state), dummy, FieldScalarType::Real),
        }
    }

    pub fn save_tag(&self) -> &FieldTag {
        &self.save_tag
    }
}

impl<E: EvaluationType> Evaluator<E> for SaveStateField {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.field);
        fields.evaluates(&self.save_tag);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_promotable(setup, &mut self.field, FieldScalarType::Scalar)?;
        require_states(setup, &self.name)?.register_state(&self.state, self.field.layout(), 0.0, self.save_old)
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        if E::KIND != EvaluationKind::Residual {
            return Ok(());
        }
        let values = data.fields.read_values::<E>(&self.field, self.field.layout().size())?;
        data.states()?.write(data.workset.index(), &self.state, |state| {
            state.clear();
            state.extend_from_slice(&values);
        })
    }
}

/// Copies the sides of a side set from a [Cell, Side, ...] field into a side state, at the end of
/// Residual passes.
///
/// Entry `i` of the workset's side list is stored at position `i` of the state array. Worksets
/// without the side set are skipped.
#[derive(Debug, Clone)]
pub struct SaveSideSetStateField {
    name: String,
    state: String,
    side_set: String,
    side_layout: Arc<DataLayout>,
    field: AnyField,
    save_tag: FieldTag,
}

impl SaveSideSetStateField {
    pub fn new(
        field: &str,
        state: &str,
        side_set: &str,
        layout: &Arc<DataLayout>,
        dummy: &Arc<DataLayout>,
        class: FieldScalarType,
    ) -> Result<Self, GraphError> {
        layout.expect_leading_dims(field, &[DimTag::Cell, DimTag::Side])?;
        let side_dims = layout.dims()[2..]
            .iter()
            .cloned()
            .zip(layout.extents()[2..].iter().copied());
        Ok(Self {
            name: format!("Save Side Set State Field {} on {}", state, side_set),
            state: state.to_string(),
            side_set: side_set.to_string(),
            side_layout: Arc::new(DataLayout::new(side_dims)),
            field: AnyField::new(field, layout, class),
            save_tag: FieldTag::new(format!("Save {}", state), dummy, FieldScalarType::Real),
        })
    }

    pub fn save_tag(&self) -> &FieldTag {
        &self.save_tag
    }
}

impl<E: EvaluationType> Evaluator<E> for SaveSideSetStateField {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare(&self, fields: &mut FieldDeclarations) {
        fields.depends_on(&self.field);
        fields.evaluates(&self.save_tag);
    }

    fn post_registration_setup(&mut self, setup: &SetupData<E>) -> Result<(), GraphError> {
        bind_promotable(setup, &mut self.field, FieldScalarType::Scalar)?;
        require_states(setup, &self.name)?.register_side_state(&self.state, &self.side_set, &self.side_layout)
    }

    fn evaluate_fields(&self, data: &mut EvalData) -> eyre::Result<()> {
        if E::KIND != EvaluationKind::Residual {
            return Ok(());
        }
        let workset = data.workset;
        let sides = match workset.side_set(&self.side_set) {
            Some(sides) => sides,
            None => {
                trace!("Workset {} has no side set '{}'", workset.index(), self.side_set);
                return Ok(());
            }
        };

        let layout = self.field.layout();
        let sides_per_cell = layout.extent(1);
        let per_side = layout.trailing_size(2);
        if let Some(entry) = sides.iter().find(|entry| entry.side >= sides_per_cell) {
            return Err(eyre!(
                "Side {} of cell {} in side set '{}' exceeds the {} sides per cell of '{}'",
                entry.side,
                entry.cell,
                self.side_set,
                sides_per_cell,
                self.field.name()
            ));
        }

        let values = data
            .fields
            .read_values::<E>(&self.field, layout.active_size(workset.num_cells()))?;
        data.states()?.write(workset.index(), &self.state, |state| {
            state.clear();
            state.resize(sides.len() * per_side, 0.0);
            for (entry, target) in sides.iter().zip(state.chunks_exact_mut(per_side.max(1))) {
                let start = (entry.cell * sides_per_cell + entry.side) * per_side;
                target.copy_from_slice(&values[start..start + per_side]);
            }
        })
    }
}
