use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};

/// Type-erased scratch buffers owned by one worker thread.
///
/// A thread executing worksets keeps one `Workspace` for the whole pass, so buffers sized for the
/// first workset are reused by all later ones. Evaluators run sequentially within a workset and
/// have exclusive access to the buffers they retrieve while their `evaluate_fields` runs. Contents
/// left behind by a previous evaluator are unspecified.
#[derive(Debug, Default)]
pub struct Workspace {
    buffers: FxHashMap<TypeId, Box<dyn Any + Send>>,
}

impl Workspace {
    pub fn get_or_insert_with<W, F>(&mut self, create: F) -> &mut W
    where
        W: 'static + Send,
        F: FnOnce() -> W,
    {
        self.buffers
            .entry(TypeId::of::<W>())
            .or_insert_with(|| Box::new(create()))
            .downcast_mut()
            .expect("Buffers are keyed by their own type id")
    }

    pub fn get_or_default<W>(&mut self) -> &mut W
    where
        W: 'static + Send + Default,
    {
        self.get_or_insert_with(W::default)
    }
}
