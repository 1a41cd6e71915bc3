//! The field manager: evaluator registry, dependency resolution and workset execution.
use crate::comm::Communicator;
use crate::discretization::Discretization;
use crate::error::GraphError;
use crate::eval_type::EvaluationType;
use crate::evaluator::{EvalData, Evaluator, FieldBinding, FieldDeclarations, SetupData};
use crate::field::{AsFieldTag, FieldTag};
use crate::global::{merge_responses, reduce_responses, GlobalOutputs, ResponseValue, WorksetContributions};
use crate::inputs::EvaluationInputs;
use crate::layout::DimTag;
use crate::mdfield::{AnyField, FieldId, FieldStore};
use crate::params::ParameterLibrary;
use crate::state::StateManager;
use crate::workset::Workset;
use crate::workspace::Workspace;
use eyre::{eyre, WrapErr};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use rustc_hash::FxHashMap;
use std::cell::{RefCell, RefMut};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt;
use std::fmt::Display;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// Where the values of an external field come from in each workset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalSource {
    /// Nodal coordinates of the workset, laid out (cell, node, dim).
    Coordinates,
    /// A named raw array attached to the workset.
    WorksetArray(String),
    /// A named array of the state manager.
    State(String),
}

impl Display for ExternalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalSource::Coordinates => write!(f, "coordinates"),
            ExternalSource::WorksetArray(name) => write!(f, "workset array '{}'", name),
            ExternalSource::State(name) => write!(f, "state '{}'", name),
        }
    }
}

#[derive(Debug, Clone)]
struct External {
    field: AnyField,
    source: ExternalSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Field storage assignment and evaluator order, fixed at post-registration setup.
#[derive(Debug)]
struct ExecutionPlan {
    order: Arc<[usize]>,
    tags: Vec<FieldTag>,
    bindings: FxHashMap<FieldTag, FieldBinding>,
    externals: Vec<External>,
    max_cells: usize,
    /// Distinct Node extents of fields laid out as [Cell, Node, ...].
    node_extents: Vec<usize>,
    /// Responses contributed to by evaluators in the order, sorted by name.
    responses: Vec<String>,
}

/// Everything a thread needs to execute worksets.
struct ThreadData {
    store: FieldStore,
    scratch: Workspace,
    contributions: WorksetContributions,
}

impl ThreadData {
    fn new<E: EvaluationType>(plan: &ExecutionPlan) -> Self {
        Self {
            store: FieldStore::allocate::<E>(&plan.tags),
            scratch: Workspace::default(),
            contributions: WorksetContributions::default(),
        }
    }
}

/// Owns the evaluators of one evaluation type and executes them over worksets.
///
/// Usage follows three phases:
///  1. Registration: [`register_evaluator`](Self::register_evaluator),
///     [`declare_external`](Self::declare_external) and [`require_field`](Self::require_field).
///  2. [`post_registration_setup`](Self::post_registration_setup), which orders the evaluators
///     needed for the required fields, allocates field storage and binds field handles.
///  3. Any number of evaluation passes.
pub struct FieldManager<E: EvaluationType> {
    evaluators: Vec<Box<dyn Evaluator<E>>>,
    declarations: Vec<FieldDeclarations>,
    producers: FxHashMap<FieldTag, usize>,
    externals: Vec<External>,
    external_lookup: FxHashMap<FieldTag, usize>,
    required: Vec<FieldTag>,
    order_cache: Mutex<FxHashMap<Vec<FieldTag>, Arc<[usize]>>>,
    plan: Option<ExecutionPlan>,
    thread_data: ThreadLocal<RefCell<ThreadData>>,
    parameters: Arc<ParameterLibrary>,
    states: Option<Arc<StateManager>>,
    min_worksets_per_task: usize,
    marker: PhantomData<E>,
}

impl<E: EvaluationType> Default for FieldManager<E> {
    fn default() -> Self {
        Self::new(Arc::new(ParameterLibrary::new()))
    }
}

impl<E: EvaluationType> fmt::Debug for FieldManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldManager")
            .field("evaluation_type", &E::KIND)
            .field("evaluators", &self.evaluator_names())
            .field("required", &self.required)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

impl<E: EvaluationType> FieldManager<E> {
    pub fn new(parameters: Arc<ParameterLibrary>) -> Self {
        Self {
            evaluators: Vec::new(),
            declarations: Vec::new(),
            producers: FxHashMap::default(),
            externals: Vec::new(),
            external_lookup: FxHashMap::default(),
            required: Vec::new(),
            order_cache: Mutex::new(FxHashMap::default()),
            plan: None,
            thread_data: ThreadLocal::new(),
            parameters,
            states: None,
            min_worksets_per_task: 1,
            marker: PhantomData,
        }
    }

    pub fn with_state_manager(self, states: Arc<StateManager>) -> Self {
        Self {
            states: Some(states),
            ..self
        }
    }

    /// Sets the minimum number of worksets processed by a single parallel task.
    pub fn with_min_worksets_per_task(self, min_len: usize) -> Self {
        Self {
            min_worksets_per_task: min_len.max(1),
            ..self
        }
    }

    pub fn parameters(&self) -> &Arc<ParameterLibrary> {
        &self.parameters
    }

    pub fn states(&self) -> Option<&Arc<StateManager>> {
        self.states.as_ref()
    }

    pub fn num_evaluators(&self) -> usize {
        self.evaluators.len()
    }

    pub fn evaluator_names(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    pub fn declarations(&self, evaluator: usize) -> Option<&FieldDeclarations> {
        self.declarations.get(evaluator)
    }

    pub fn required_fields(&self) -> &[FieldTag] {
        &self.required
    }

    pub fn is_finalized(&self) -> bool {
        self.plan.is_some()
    }

    fn ensure_not_finalized(&self, operation: &str) -> Result<(), GraphError> {
        if self.is_finalized() {
            Err(GraphError::AlreadyFinalized {
                operation: operation.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn provider_name(&self, tag: &FieldTag) -> Option<String> {
        if let Some(&idx) = self.producers.get(tag) {
            Some(self.evaluators[idx].name().to_string())
        } else {
            self.external_lookup
                .get(tag)
                .map(|&idx| format!("external input ({})", self.externals[idx].source))
        }
    }

    /// Registers an evaluator.
    ///
    /// Fails with [`GraphError::DuplicateOutput`] if one of its evaluated fields already has a
    /// provider, in which case the manager is left unchanged.
    pub fn register_evaluator(&mut self, evaluator: impl Evaluator<E> + 'static) -> Result<(), GraphError> {
        self.register_boxed(Box::new(evaluator))
    }

    pub fn register_boxed(&mut self, evaluator: Box<dyn Evaluator<E>>) -> Result<(), GraphError> {
        self.ensure_not_finalized("register evaluators")?;
        let mut declarations = FieldDeclarations::default();
        evaluator.declare(&mut declarations);

        for tag in declarations.evaluated() {
            if let Some(existing) = self.provider_name(tag) {
                return Err(GraphError::DuplicateOutput {
                    field: tag.to_string(),
                    evaluator: evaluator.name().to_string(),
                    existing,
                });
            }
        }

        let idx = self.evaluators.len();
        for tag in declarations.evaluated() {
            self.producers.insert(tag.clone(), idx);
        }
        trace!(
            "Registered evaluator '{}' for {}: {} dependent, {} evaluated fields",
            evaluator.name(),
            E::KIND,
            declarations.dependent().len(),
            declarations.evaluated().len()
        );
        self.evaluators.push(evaluator);
        self.declarations.push(declarations);
        Ok(())
    }

    /// Declares a field whose values are copied in from the workset before any evaluator runs.
    pub fn declare_external(&mut self, field: &impl AsFieldTag, source: ExternalSource) -> Result<(), GraphError> {
        self.ensure_not_finalized("declare external fields")?;
        let tag = field.field_tag();
        if let Some(existing) = self.provider_name(tag) {
            return Err(GraphError::DuplicateOutput {
                field: tag.to_string(),
                evaluator: format!("external input ({})", source),
                existing,
            });
        }
        self.external_lookup.insert(tag.clone(), self.externals.len());
        self.externals.push(External {
            field: AnyField::from_tag(tag.clone()),
            source,
        });
        Ok(())
    }

    /// Adds a field to the set of fields every pass must compute.
    pub fn require_field(&mut self, field: &impl AsFieldTag) -> Result<(), GraphError> {
        self.ensure_not_finalized("require fields")?;
        let tag = field.field_tag();
        if !self.required.contains(tag) {
            self.required.push(tag.clone());
        }
        Ok(())
    }

    fn missing_provider(&self, tag: &FieldTag, required_by: &str) -> GraphError {
        let same_name = self
            .producers
            .keys()
            .chain(self.external_lookup.keys())
            .filter(|other| other.name() == tag.name())
            .min();
        match same_name {
            Some(other) => GraphError::LayoutMismatch {
                field: tag.name().to_string(),
                expected: tag.layout().to_string(),
                found: other.layout().to_string(),
            },
            None => GraphError::MissingProvider {
                field: tag.to_string(),
                required_by: required_by.to_string(),
            },
        }
    }

    /// Depth-first resolution of the producer of `tag` and all of its transitive dependencies.
    ///
    /// `path` holds the evaluators currently being visited, each with the field through which
    /// it was reached.
    fn visit(
        &self,
        tag: &FieldTag,
        required_by: &str,
        marks: &mut [Mark],
        path: &mut Vec<(usize, FieldTag)>,
    ) -> Result<(), GraphError> {
        if self.external_lookup.contains_key(tag) {
            return Ok(());
        }
        let idx = match self.producers.get(tag) {
            Some(&idx) => idx,
            None => return Err(self.missing_provider(tag, required_by)),
        };

        match marks[idx] {
            Mark::Done => Ok(()),
            Mark::Visiting => {
                let start = path.iter().position(|(e, _)| *e == idx).unwrap_or(0);
                let mut evaluators: Vec<String> = path[start..]
                    .iter()
                    .map(|(e, _)| self.evaluators[*e].name().to_string())
                    .collect();
                evaluators.push(self.evaluators[idx].name().to_string());
                let mut fields: Vec<String> = path[start + 1..].iter().map(|(_, t)| t.to_string()).collect();
                fields.push(tag.to_string());
                Err(GraphError::CyclicDependency { evaluators, fields })
            }
            Mark::Unvisited => {
                marks[idx] = Mark::Visiting;
                path.push((idx, tag.clone()));
                let name = self.evaluators[idx].name();
                for dependency in self.declarations[idx].dependent() {
                    self.visit(dependency, name, marks, path)?;
                }
                path.pop();
                marks[idx] = Mark::Done;
                Ok(())
            }
        }
    }

    fn compute_order(&self, required: &[FieldTag]) -> Result<Vec<usize>, GraphError> {
        let n = self.evaluators.len();
        let mut marks = vec![Mark::Unvisited; n];
        let mut path = Vec::new();
        for tag in required {
            self.visit(tag, "required field list", &mut marks, &mut path)?;
        }

        // The reachable subgraph is acyclic. Kahn's algorithm with a min-heap on the
        // registration index yields the topological order that prefers earlier registrations.
        let reachable: Vec<bool> = marks.iter().map(|m| *m == Mark::Done).collect();
        let mut in_degree = vec![0usize; n];
        let mut dependents = vec![Vec::new(); n];
        for i in (0..n).filter(|&i| reachable[i]) {
            for tag in self.declarations[i].dependent() {
                if let Some(&j) = self.producers.get(tag) {
                    dependents[j].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| reachable[i] && in_degree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(reachable.iter().filter(|r| **r).count());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &k in &dependents[i] {
                in_degree[k] -= 1;
                if in_degree[k] == 0 {
                    ready.push(Reverse(k));
                }
            }
        }
        debug_assert_eq!(order.len(), reachable.iter().filter(|r| **r).count());
        Ok(order)
    }

    /// The order in which evaluators must run to compute the given fields.
    ///
    /// Each evaluator appears after all producers of its dependent fields. Among evaluators
    /// that are ready at the same time, earlier registrations come first. Orders are memoized
    /// per set of required fields.
    pub fn execution_order(&self, required: &[FieldTag]) -> Result<Arc<[usize]>, GraphError> {
        let mut key = required.to_vec();
        key.sort();
        key.dedup();

        if let Some(order) = self.order_cache.lock().get(&key) {
            return Ok(Arc::clone(order));
        }

        let order: Arc<[usize]> = self.compute_order(&key)?.into();
        debug!("Execution order for {} with {} required fields:", E::KIND, key.len());
        for (position, &idx) in order.iter().enumerate() {
            debug!("  {:>3}: {}", position, self.evaluators[idx].name());
        }
        self.order_cache.lock().insert(key, Arc::clone(&order));
        Ok(order)
    }

    /// Names of the evaluators in the execution order of the required fields.
    pub fn ordered_evaluator_names(&self) -> Result<Vec<&str>, GraphError> {
        let order = self.execution_order(&self.required)?;
        Ok(order.iter().map(|&idx| self.evaluators[idx].name()).collect())
    }

    /// Finalizes the graph: orders the evaluators needed for the required fields, assigns
    /// storage to their fields and runs their setup.
    ///
    /// Only evaluators in the execution order are set up and executed.
    pub fn post_registration_setup(&mut self) -> Result<(), GraphError> {
        self.ensure_not_finalized("run post-registration setup")?;
        if self.required.is_empty() {
            warn!("Field manager for {} has no required fields", E::KIND);
        }
        let order = self.execution_order(&self.required)?;

        let mut tags = Vec::new();
        let mut bindings = FxHashMap::default();
        let mut assign = |tag: &FieldTag| {
            if !bindings.contains_key(tag) {
                let binding = FieldBinding {
                    id: FieldId(tags.len()),
                    scalar_type: tag.scalar_type(),
                };
                bindings.insert(tag.clone(), binding);
                tags.push(tag.clone());
            }
        };
        for external in &self.externals {
            assign(external.field.tag());
        }
        for &idx in order.iter() {
            for tag in self.declarations[idx].evaluated() {
                assign(tag);
            }
        }

        let mut externals = self.externals.clone();
        for external in &mut externals {
            let binding = bindings[external.field.tag()];
            external.field.bind(binding.id, binding.scalar_type);
        }

        {
            let setup = SetupData::<E>::new(&bindings, &self.parameters, self.states.as_deref());
            for &idx in order.iter() {
                self.evaluators[idx].post_registration_setup(&setup)?;
            }
        }

        let max_cells = tags
            .iter()
            .filter(|tag| tag.layout().dims().first() == Some(&DimTag::Cell))
            .map(|tag| tag.layout().extent(0))
            .min()
            .unwrap_or(usize::MAX);

        let node_extents: BTreeSet<usize> = tags
            .iter()
            .filter(|tag| tag.layout().dims().get(1) == Some(&DimTag::Node))
            .map(|tag| tag.layout().extent(1))
            .collect();
        let responses: BTreeSet<String> = order
            .iter()
            .flat_map(|&idx| self.declarations[idx].responses().iter().cloned())
            .collect();

        info!(
            "Set up {} of {} evaluators and {} fields for {}",
            order.len(),
            self.evaluators.len(),
            tags.len(),
            E::KIND
        );

        self.plan = Some(ExecutionPlan {
            order,
            tags,
            bindings,
            externals,
            max_cells,
            node_extents: node_extents.into_iter().collect(),
            responses: responses.into_iter().collect(),
        });
        Ok(())
    }

    fn plan(&self, operation: &str) -> Result<&ExecutionPlan, GraphError> {
        self.plan.as_ref().ok_or_else(|| GraphError::NotFinalized {
            operation: operation.to_string(),
        })
    }

    fn load_externals(&self, plan: &ExecutionPlan, workset: &Workset, store: &FieldStore) -> eyre::Result<()> {
        for external in &plan.externals {
            let field = &external.field;
            let loaded = match &external.source {
                ExternalSource::Coordinates => store.write_reals::<E>(field, workset.coordinates()),
                ExternalSource::WorksetArray(name) => {
                    let values = workset.array(name).ok_or_else(|| {
                        eyre!(
                            "Workset {} has no array '{}' for external field {}",
                            workset.index(),
                            name,
                            field.tag()
                        )
                    })?;
                    store.write_reals::<E>(field, values)
                }
                ExternalSource::State(name) => {
                    let states = self
                        .states
                        .as_ref()
                        .ok_or_else(|| eyre!("External field {} reads a state without a state manager", field.tag()))?;
                    states.read(workset.index(), name, |values| store.write_reals::<E>(field, values))?
                }
            };
            loaded.wrap_err_with(|| format!("Failed to load external field {}", field.tag()))?;
        }
        Ok(())
    }

    fn run_workset(
        &self,
        plan: &ExecutionPlan,
        workset: &Workset,
        inputs: &EvaluationInputs,
        data: &mut ThreadData,
    ) -> eyre::Result<()> {
        if workset.num_cells() > plan.max_cells {
            return Err(eyre!(
                "Workset {} has {} cells, but field layouts hold at most {}",
                workset.index(),
                workset.num_cells(),
                plan.max_cells
            ));
        }
        if let Some(&extent) = plan
            .node_extents
            .iter()
            .find(|&&extent| extent != workset.nodes_per_cell())
        {
            return Err(eyre!(
                "Workset {} has {} nodes per cell, but field layouts hold {}",
                workset.index(),
                workset.nodes_per_cell(),
                extent
            ));
        }
        trace!("Begin workset {} ({} cells) for {}", workset.index(), workset.num_cells(), E::KIND);

        let ThreadData {
            store,
            scratch,
            contributions,
        } = data;
        contributions.clear();
        self.load_externals(plan, workset, store)?;

        for &idx in plan.order.iter() {
            let evaluator = &self.evaluators[idx];
            let mut eval_data = EvalData {
                workset,
                inputs,
                fields: &*store,
                scratch: &mut *scratch,
                contributions: &mut *contributions,
                parameters: &self.parameters,
                states: self.states.as_deref(),
            };
            evaluator
                .evaluate_fields(&mut eval_data)
                .wrap_err_with(|| format!("Evaluator '{}' failed on workset {}", evaluator.name(), workset.index()))?;
        }

        trace!("End workset {} for {}", workset.index(), E::KIND);
        Ok(())
    }

    fn thread_data(&self, plan: &ExecutionPlan) -> ThreadDataGuard<'_> {
        let cell = self
            .thread_data
            .get_or(|| RefCell::new(ThreadData::new::<E>(plan)));
        match cell.try_borrow_mut() {
            Ok(data) => ThreadDataGuard::Shared(data),
            // The thread is already executing a workset further up the stack
            Err(_) => ThreadDataGuard::Owned(Box::new(ThreadData::new::<E>(plan))),
        }
    }

    /// Evaluates all worksets of a discretization and adds the results to `outputs`.
    ///
    /// Worksets are processed in parallel. Their contributions are added to `outputs` in
    /// workset order, so the result does not depend on the number of threads. Response values
    /// are summed over `comm`. If the pass fails, `outputs` is left unchanged.
    pub fn evaluate(
        &self,
        disc: &dyn Discretization,
        inputs: &EvaluationInputs,
        outputs: &mut GlobalOutputs,
        comm: &dyn Communicator,
    ) -> eyre::Result<()> {
        let plan = self.plan("evaluate")?;
        inputs.check_sizes(disc.num_dofs())?;
        let worksets = disc.worksets();

        let contributions = worksets
            .par_iter()
            .with_min_len(self.min_worksets_per_task)
            .map(|workset| -> eyre::Result<WorksetContributions> {
                let mut data = self.thread_data(plan);
                self.run_workset(plan, workset, inputs, &mut data)?;
                Ok(std::mem::take(&mut data.contributions))
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        for workset_contributions in &contributions {
            outputs.check_contributions::<E>(workset_contributions)?;
        }

        // Every rank reduces the same responses, including those it has no cells for
        let mut responses: BTreeMap<String, ResponseValue> = plan
            .responses
            .iter()
            .map(|name| (name.clone(), ResponseValue::default()))
            .collect();
        for workset_contributions in &contributions {
            outputs.accumulate::<E>(workset_contributions)?;
            merge_responses(&mut responses, workset_contributions.responses());
        }
        reduce_responses(&mut responses, comm);
        outputs.add_responses(&responses);
        Ok(())
    }

    /// Evaluates a single workset on the calling thread and gives access to its fields.
    pub fn evaluate_workset<'a>(
        &'a self,
        workset: &Workset,
        inputs: &EvaluationInputs,
    ) -> eyre::Result<WorksetEvaluation<'a, E>> {
        let plan = self.plan("evaluate worksets")?;
        inputs.check_sizes(inputs.x().len())?;
        let mut data = self.thread_data(plan);
        self.run_workset(plan, workset, inputs, &mut data)?;
        Ok(WorksetEvaluation {
            data,
            bindings: &plan.bindings,
            num_cells: workset.num_cells(),
            marker: PhantomData,
        })
    }

    /// Writes the evaluator graph in Graphviz DOT format.
    ///
    /// Evaluators are nodes and edges are labelled with the fields they carry. External
    /// inputs are drawn as boxes. After setup, only evaluators in the execution order are
    /// included.
    pub fn write_graphviz(&self, w: &mut impl Write) -> std::io::Result<()> {
        let included: Vec<usize> = match &self.plan {
            Some(plan) => plan.order.to_vec(),
            None => (0..self.evaluators.len()).collect(),
        };

        writeln!(w, "digraph \"{}\" {{", E::KIND.type_name())?;
        for (k, external) in self.externals.iter().enumerate() {
            writeln!(
                w,
                "  x{} [shape=box, label=\"{}\"];",
                k,
                escape(&external.field.tag().to_string())
            )?;
        }
        for &i in &included {
            writeln!(w, "  e{} [label=\"{}\"];", i, escape(self.evaluators[i].name()))?;
        }
        for &i in &included {
            for tag in self.declarations[i].dependent() {
                let source = if let Some(&j) = self.producers.get(tag) {
                    format!("e{}", j)
                } else if let Some(&k) = self.external_lookup.get(tag) {
                    format!("x{}", k)
                } else {
                    continue;
                };
                writeln!(w, "  {} -> e{} [label=\"{}\"];", source, i, escape(tag.name()))?;
            }
        }
        writeln!(w, "}}")
    }
}

fn escape(s: &str) -> String {
    s.replace('"', "\\\"")
}

enum ThreadDataGuard<'a> {
    Shared(RefMut<'a, ThreadData>),
    Owned(Box<ThreadData>),
}

impl<'a> std::ops::Deref for ThreadDataGuard<'a> {
    type Target = ThreadData;

    fn deref(&self) -> &ThreadData {
        match self {
            ThreadDataGuard::Shared(data) => data,
            ThreadDataGuard::Owned(data) => data,
        }
    }
}

impl<'a> std::ops::DerefMut for ThreadDataGuard<'a> {
    fn deref_mut(&mut self) -> &mut ThreadData {
        match self {
            ThreadDataGuard::Shared(data) => data,
            ThreadDataGuard::Owned(data) => data,
        }
    }
}

/// The fields and contributions of a single evaluated workset.
pub struct WorksetEvaluation<'a, E> {
    data: ThreadDataGuard<'a>,
    bindings: &'a FxHashMap<FieldTag, FieldBinding>,
    num_cells: usize,
    marker: PhantomData<E>,
}

impl<'a, E: EvaluationType> WorksetEvaluation<'a, E> {
    fn bound(&self, field: &impl AsFieldTag) -> eyre::Result<AnyField> {
        let tag = field.field_tag();
        let binding = self
            .bindings
            .get(tag)
            .ok_or_else(|| eyre!("Field {} is not part of the execution plan", tag))?;
        let mut any = AnyField::from_tag(tag.clone());
        any.bind(binding.id, binding.scalar_type);
        Ok(any)
    }

    /// The values of a field in the active cells, as stored.
    pub fn values<S: 'static + Clone>(&self, field: &impl AsFieldTag) -> eyre::Result<Vec<S>> {
        let any = self.bound(field)?;
        let len = any.layout().active_size(self.num_cells);
        let view = self.data.store.view_any::<S>(&any)?;
        Ok(view.as_slice()[..len.min(view.len())].to_vec())
    }

    /// The plain values of a field in the active cells, without derivatives.
    pub fn real_values(&self, field: &impl AsFieldTag) -> eyre::Result<Vec<f64>> {
        let any = self.bound(field)?;
        let len = any.layout().active_size(self.num_cells);
        self.data.store.read_values::<E>(&any, len)
    }

    pub fn contributions(&self) -> &WorksetContributions {
        &self.data.contributions
    }
}
