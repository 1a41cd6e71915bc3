//! Persistent per-workset state arrays.
use crate::error::GraphError;
use crate::layout::DataLayout;
use eyre::eyre;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StateInfo {
    layout: Arc<DataLayout>,
    init: f64,
    save_old: bool,
    side_set: Option<String>,
}

/// Named arrays that persist across evaluation passes, one per workset.
///
/// Cell states have the size of their layout in every workset. Side-set states are indexed by
/// the position of a side in the workset's side list and grow as they are written.
#[derive(Debug)]
pub struct StateManager {
    states: RwLock<BTreeMap<String, StateInfo>>,
    arrays: Vec<Mutex<FxHashMap<String, Vec<f64>>>>,
}

impl StateManager {
    pub fn new(num_worksets: usize) -> Self {
        Self {
            states: RwLock::new(BTreeMap::new()),
            arrays: (0..num_worksets).map(|_| Mutex::new(FxHashMap::default())).collect(),
        }
    }

    pub fn num_worksets(&self) -> usize {
        self.arrays.len()
    }

    fn register(&self, name: &str, info: StateInfo) -> Result<(), GraphError> {
        let mut states = self.states.write();
        if let Some(existing) = states.get_mut(name) {
            if existing.layout != info.layout || existing.side_set != info.side_set {
                return Err(GraphError::LayoutMismatch {
                    field: name.to_string(),
                    expected: existing.layout.to_string(),
                    found: info.layout.to_string(),
                });
            }
            if info.save_old && !existing.save_old {
                existing.save_old = true;
                for arrays in &self.arrays {
                    let mut arrays = arrays.lock();
                    if let Some(current) = arrays.get(name).cloned() {
                        arrays.insert(old_name(name), current);
                    }
                }
            }
            return Ok(());
        }

        let initial = match info.side_set {
            Some(_) => Vec::new(),
            None => vec![info.init; info.layout.size()],
        };
        for arrays in &self.arrays {
            let mut arrays = arrays.lock();
            arrays.insert(name.to_string(), initial.clone());
            if info.save_old {
                arrays.insert(old_name(name), initial.clone());
            }
        }
        states.insert(name.to_string(), info);
        Ok(())
    }

    /// Registers a cell state. Registering an existing state with the same layout keeps its values
    /// and can only turn `save_old` on.
    ///
    /// With `save_old`, a companion state `"<name>_old"` receives the current values on every
    /// [`update_states`](Self::update_states).
    pub fn register_state(
        &self,
        name: &str,
        layout: &Arc<DataLayout>,
        init: f64,
        save_old: bool,
    ) -> Result<(), GraphError> {
        self.register(
            name,
            StateInfo {
                layout: Arc::clone(layout),
                init,
                save_old,
                side_set: None,
            },
        )
    }

    /// Registers a state stored per side of a side set, with `layout` describing one side.
    pub fn register_side_state(&self, name: &str, side_set: &str, layout: &Arc<DataLayout>) -> Result<(), GraphError> {
        self.register(
            name,
            StateInfo {
                layout: Arc::clone(layout),
                init: 0.0,
                save_old: false,
                side_set: Some(side_set.to_string()),
            },
        )
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.states.read().contains_key(name)
    }

    pub fn layout(&self, name: &str) -> Option<Arc<DataLayout>> {
        self.states.read().get(name).map(|info| Arc::clone(&info.layout))
    }

    pub fn side_set(&self, name: &str) -> Option<String> {
        self.states.read().get(name).and_then(|info| info.side_set.clone())
    }

    pub fn state_names(&self) -> Vec<String> {
        self.states.read().keys().cloned().collect()
    }

    pub fn read<R>(&self, workset: usize, name: &str, f: impl FnOnce(&[f64]) -> R) -> eyre::Result<R> {
        let arrays = self
            .arrays
            .get(workset)
            .ok_or_else(|| eyre!("No state arrays for workset {}", workset))?
            .lock();
        let array = arrays
            .get(name)
            .ok_or_else(|| eyre!("State '{}' is not registered", name))?;
        Ok(f(array))
    }

    pub fn write<R>(&self, workset: usize, name: &str, f: impl FnOnce(&mut Vec<f64>) -> R) -> eyre::Result<R> {
        let mut arrays = self
            .arrays
            .get(workset)
            .ok_or_else(|| eyre!("No state arrays for workset {}", workset))?
            .lock();
        let array = arrays
            .get_mut(name)
            .ok_or_else(|| eyre!("State '{}' is not registered", name))?;
        Ok(f(array))
    }

    /// Copies the current values of every state registered with `save_old` into its old state.
    pub fn update_states(&self) {
        let states = self.states.read();
        for arrays in &self.arrays {
            let mut arrays = arrays.lock();
            for (name, _) in states.iter().filter(|(_, info)| info.save_old) {
                if let Some(current) = arrays.get(name).cloned() {
                    arrays.insert(old_name(name), current);
                }
            }
        }
    }
}

fn old_name(name: &str) -> String {
    format!("{}_old", name)
}
