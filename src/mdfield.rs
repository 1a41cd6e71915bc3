//! Field handles and per-workset field storage.
//!
//! An [`MDField`] is an unbound handle created by an evaluator at construction time. During
//! post-registration setup the handle is bound to a [`FieldId`], and during evaluation the id
//! selects a buffer in the [`FieldStore`] of the thread executing the current workset.
use crate::eval_type::EvaluationType;
use crate::field::{AsFieldTag, FieldScalarType, FieldTag};
use crate::layout::DataLayout;
use eyre::eyre;
use fieldgraph_traits::FieldScalar;
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

/// Index of a field buffer in a [`FieldStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A handle to a field holding values of type `S`.
pub struct MDField<S> {
    tag: FieldTag,
    id: Option<FieldId>,
    marker: PhantomData<fn() -> S>,
}

impl<S> Clone for MDField<S> {
    fn clone(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            id: self.id,
            marker: PhantomData,
        }
    }
}

impl<S> fmt::Debug for MDField<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MDField")
            .field("tag", &self.tag)
            .field("id", &self.id)
            .finish()
    }
}

impl<S: 'static> MDField<S> {
    pub fn new(name: impl AsRef<str>, layout: &Arc<DataLayout>, scalar_type: FieldScalarType) -> Self {
        Self::from_tag(FieldTag::new(name, layout, scalar_type))
    }

    pub fn from_tag(tag: FieldTag) -> Self {
        Self {
            tag,
            id: None,
            marker: PhantomData,
        }
    }

    pub fn tag(&self) -> &FieldTag {
        &self.tag
    }

    pub fn name(&self) -> &str {
        self.tag.name()
    }

    pub fn layout(&self) -> &Arc<DataLayout> {
        self.tag.layout()
    }

    pub fn id(&self) -> Option<FieldId> {
        self.id
    }

    pub fn is_bound(&self) -> bool {
        self.id.is_some()
    }

    pub(crate) fn bind(&mut self, id: FieldId) {
        self.id = Some(id);
    }
}

impl<S> AsFieldTag for MDField<S> {
    fn field_tag(&self) -> &FieldTag {
        &self.tag
    }
}

/// A handle to a field whose scalar type is selected at runtime from its scalar class.
///
/// Binding replaces the class of the handle with the class of the bound storage.
#[derive(Debug, Clone)]
pub struct AnyField {
    tag: FieldTag,
    id: Option<FieldId>,
}

impl AnyField {
    pub fn new(name: impl AsRef<str>, layout: &Arc<DataLayout>, scalar_type: FieldScalarType) -> Self {
        Self::from_tag(FieldTag::new(name, layout, scalar_type))
    }

    pub fn from_tag(tag: FieldTag) -> Self {
        Self { tag, id: None }
    }

    pub fn tag(&self) -> &FieldTag {
        &self.tag
    }

    pub fn name(&self) -> &str {
        self.tag.name()
    }

    pub fn layout(&self) -> &Arc<DataLayout> {
        self.tag.layout()
    }

    pub fn scalar_type(&self) -> FieldScalarType {
        self.tag.scalar_type()
    }

    pub fn id(&self) -> Option<FieldId> {
        self.id
    }

    pub(crate) fn bind(&mut self, id: FieldId, scalar_type: FieldScalarType) {
        self.tag = self.tag.with_scalar_type(scalar_type);
        self.id = Some(id);
    }
}

impl AsFieldTag for AnyField {
    fn field_tag(&self) -> &FieldTag {
        &self.tag
    }
}

/// A multi-index into a field, in the tag order of its layout.
pub trait FieldIndex {
    fn offset(&self, layout: &DataLayout) -> usize;
}

#[inline(always)]
fn offset_of(indices: &[usize], layout: &DataLayout) -> usize {
    debug_assert_eq!(indices.len(), layout.rank(), "Index rank must match layout rank.");
    let mut offset = 0;
    for (&idx, &extent) in indices.iter().zip(layout.extents()) {
        debug_assert!(idx < extent, "Index {} out of bounds for extent {}.", idx, extent);
        offset = offset * extent + idx;
    }
    offset
}

impl FieldIndex for usize {
    #[inline(always)]
    fn offset(&self, layout: &DataLayout) -> usize {
        offset_of(&[*self], layout)
    }
}

impl FieldIndex for (usize, usize) {
    #[inline(always)]
    fn offset(&self, layout: &DataLayout) -> usize {
        offset_of(&[self.0, self.1], layout)
    }
}

impl FieldIndex for (usize, usize, usize) {
    #[inline(always)]
    fn offset(&self, layout: &DataLayout) -> usize {
        offset_of(&[self.0, self.1, self.2], layout)
    }
}

impl FieldIndex for (usize, usize, usize, usize) {
    #[inline(always)]
    fn offset(&self, layout: &DataLayout) -> usize {
        offset_of(&[self.0, self.1, self.2, self.3], layout)
    }
}

impl<const N: usize> FieldIndex for [usize; N] {
    #[inline(always)]
    fn offset(&self, layout: &DataLayout) -> usize {
        offset_of(self, layout)
    }
}

/// Read access to the values of a field.
///
/// Multi-indices are checked per dimension in debug builds. Release builds only check the
/// resulting flat offset against the buffer length.
pub struct FieldView<'a, S> {
    data: Ref<'a, [S]>,
    layout: &'a DataLayout,
}

impl<'a, S> FieldView<'a, S> {
    pub fn layout(&self) -> &DataLayout {
        self.layout
    }

    pub fn as_slice(&self) -> &[S] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<'a, S, I: FieldIndex> Index<I> for FieldView<'a, S> {
    type Output = S;

    #[inline(always)]
    fn index(&self, index: I) -> &S {
        &self.data[index.offset(self.layout)]
    }
}

/// Write access to the values of a field.
pub struct FieldViewMut<'a, S> {
    data: RefMut<'a, [S]>,
    layout: &'a DataLayout,
}

impl<'a, S> FieldViewMut<'a, S> {
    pub fn layout(&self) -> &DataLayout {
        self.layout
    }

    pub fn as_slice(&self) -> &[S] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [S] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<'a, S, I: FieldIndex> Index<I> for FieldViewMut<'a, S> {
    type Output = S;

    #[inline(always)]
    fn index(&self, index: I) -> &S {
        &self.data[index.offset(self.layout)]
    }
}

impl<'a, S, I: FieldIndex> IndexMut<I> for FieldViewMut<'a, S> {
    #[inline(always)]
    fn index_mut(&mut self, index: I) -> &mut S {
        let offset = index.offset(self.layout);
        &mut self.data[offset]
    }
}

/// Storage for every field of an execution plan.
///
/// Each thread executing worksets owns one store. Buffers are sized for a full workset once and
/// reused across worksets; evaluators overwrite the entries of the active cells.
pub struct FieldStore {
    buffers: Vec<RefCell<Box<dyn Any + Send>>>,
    tags: Vec<FieldTag>,
}

impl fmt::Debug for FieldStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldStore").field("tags", &self.tags).finish()
    }
}

impl FieldStore {
    /// Allocates zeroed storage for the given fields, where `tags[i]` describes `FieldId(i)`.
    pub(crate) fn allocate<E: EvaluationType>(tags: &[FieldTag]) -> Self {
        let buffers = tags
            .iter()
            .map(|tag| RefCell::new(E::zeroed_buffer(tag.scalar_type(), tag.layout().size())))
            .collect();
        Self {
            buffers,
            tags: tags.to_vec(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.buffers.len()
    }

    pub fn tag(&self, id: FieldId) -> Option<&FieldTag> {
        self.tags.get(id.0)
    }

    fn slot(&self, id: Option<FieldId>, tag: &FieldTag) -> eyre::Result<(&RefCell<Box<dyn Any + Send>>, &FieldTag)> {
        let id = id.ok_or_else(|| eyre!("Field {} has not been bound to storage", tag))?;
        let buffer = self
            .buffers
            .get(id.0)
            .ok_or_else(|| eyre!("Field {} is bound to unknown storage slot {}", tag, id.0))?;
        Ok((buffer, &self.tags[id.0]))
    }

    fn borrow<S: 'static>(&self, id: Option<FieldId>, tag: &FieldTag) -> eyre::Result<FieldView<'_, S>> {
        let (cell, storage_tag) = self.slot(id, tag)?;
        let guard = cell
            .try_borrow()
            .map_err(|_| eyre!("Field {} is currently being written", tag))?;
        let data = Ref::filter_map(guard, |b| b.downcast_ref::<Vec<S>>().map(Vec::as_slice))
            .map_err(|_| eyre!("Field {} is not stored as {}", tag, std::any::type_name::<S>()))?;
        Ok(FieldView {
            data,
            layout: storage_tag.layout(),
        })
    }

    fn borrow_mut<S: 'static>(&self, id: Option<FieldId>, tag: &FieldTag) -> eyre::Result<FieldViewMut<'_, S>> {
        let (cell, storage_tag) = self.slot(id, tag)?;
        let guard = cell
            .try_borrow_mut()
            .map_err(|_| eyre!("Field {} is already borrowed", tag))?;
        let data = RefMut::filter_map(guard, |b| b.downcast_mut::<Vec<S>>().map(Vec::as_mut_slice))
            .map_err(|_| eyre!("Field {} is not stored as {}", tag, std::any::type_name::<S>()))?;
        Ok(FieldViewMut {
            data,
            layout: storage_tag.layout(),
        })
    }

    pub fn view<S: 'static>(&self, field: &MDField<S>) -> eyre::Result<FieldView<'_, S>> {
        self.borrow(field.id, &field.tag)
    }

    pub fn view_mut<S: 'static>(&self, field: &MDField<S>) -> eyre::Result<FieldViewMut<'_, S>> {
        self.borrow_mut(field.id, &field.tag)
    }

    /// Typed read access to a runtime-typed field. Fails unless `S` is the storage type.
    pub fn view_any<S: 'static>(&self, field: &AnyField) -> eyre::Result<FieldView<'_, S>> {
        self.borrow(field.id, &field.tag)
    }

    pub fn view_any_mut<S: 'static>(&self, field: &AnyField) -> eyre::Result<FieldViewMut<'_, S>> {
        self.borrow_mut(field.id, &field.tag)
    }

    /// Reads the first `len` values of a field, converted to `S`.
    ///
    /// `S` must be at least as strong as the scalar class of the field.
    pub fn read_promoted<E, S>(&self, field: &AnyField, len: usize, out: &mut Vec<S>) -> eyre::Result<()>
    where
        E: EvaluationType,
        S: FieldScalar,
    {
        out.clear();
        match field.scalar_type() {
            FieldScalarType::Real => extend_promoted(out, &self.view_any::<f64>(field)?, len),
            FieldScalarType::MeshScalar => extend_promoted(out, &self.view_any::<E::MeshScalarT>(field)?, len),
            FieldScalarType::ParamScalar => extend_promoted(out, &self.view_any::<E::ParamScalarT>(field)?, len),
            FieldScalarType::Scalar => extend_promoted(out, &self.view_any::<E::ScalarT>(field)?, len),
        }
    }

    /// Writes plain values into the first entries of a field of any scalar class.
    pub fn write_reals<E: EvaluationType>(&self, field: &AnyField, values: &[f64]) -> eyre::Result<()> {
        match field.scalar_type() {
            FieldScalarType::Real => write_from_reals(&mut self.view_any_mut::<f64>(field)?, values),
            FieldScalarType::MeshScalar => write_from_reals(&mut self.view_any_mut::<E::MeshScalarT>(field)?, values),
            FieldScalarType::ParamScalar => {
                write_from_reals(&mut self.view_any_mut::<E::ParamScalarT>(field)?, values)
            }
            FieldScalarType::Scalar => write_from_reals(&mut self.view_any_mut::<E::ScalarT>(field)?, values),
        }
    }

    /// Copies the plain values (without derivatives) of the first `len` entries of a field.
    pub fn read_values<E: EvaluationType>(&self, field: &AnyField, len: usize) -> eyre::Result<Vec<f64>> {
        let mut out = Vec::new();
        match field.scalar_type() {
            FieldScalarType::Real => collect_values(&mut out, &self.view_any::<f64>(field)?, len),
            FieldScalarType::MeshScalar => collect_values(&mut out, &self.view_any::<E::MeshScalarT>(field)?, len),
            FieldScalarType::ParamScalar => collect_values(&mut out, &self.view_any::<E::ParamScalarT>(field)?, len),
            FieldScalarType::Scalar => collect_values(&mut out, &self.view_any::<E::ScalarT>(field)?, len),
        }?;
        Ok(out)
    }
}

fn extend_promoted<T: FieldScalar, S: FieldScalar>(out: &mut Vec<S>, view: &FieldView<T>, len: usize) -> eyre::Result<()> {
    let values = view
        .as_slice()
        .get(..len)
        .ok_or_else(|| eyre!("Requested {} values from a field with {} entries", len, view.len()))?;
    out.extend(values.iter().map(S::promote_from));
    Ok(())
}

fn collect_values<T: FieldScalar>(out: &mut Vec<f64>, view: &FieldView<T>, len: usize) -> eyre::Result<()> {
    let values = view
        .as_slice()
        .get(..len)
        .ok_or_else(|| eyre!("Requested {} values from a field with {} entries", len, view.len()))?;
    out.extend(values.iter().map(FieldScalar::val));
    Ok(())
}

fn write_from_reals<S: FieldScalar>(view: &mut FieldViewMut<S>, values: &[f64]) -> eyre::Result<()> {
    let len = view.len();
    let target = view
        .as_mut_slice()
        .get_mut(..values.len())
        .ok_or_else(|| eyre!("Cannot write {} values into a field with {} entries", values.len(), len))?;
    for (t, v) in target.iter_mut().zip(values) {
        *t = S::from(*v);
    }
    Ok(())
}
