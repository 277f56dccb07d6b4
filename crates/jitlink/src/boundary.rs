//! Boundary nodes: the C-layout value tree exchanged with the engine.
//!
//! This is the only module that reads or frees raw nodes. Ownership is carried by two
//! move-only wrappers:
//!
//! * [`ArgNode`] borrows a host [`Value`] for the duration of a call. Tensor leaves point
//!   at the handles' contexts without taking them over; dropping the node frees only the
//!   tuple records and arrays built for it.
//! * [`ResultNode`] owns a tree returned by the engine. [`ResultNode::into_value`] adopts
//!   every tensor leaf into a [`Tensor`] and frees the tuple structures; dropping it
//!   unconsumed releases the leaves as well.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::engine::{same_engine, NativeEngine, TensorContext};
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::value::Value;

pub const IVALUE_TENSOR: u32 = 1;
pub const IVALUE_TUPLE: u32 = 2;

/// Tagged boundary node: a tensor context or a pointer to a [`RawTuple`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawIValue {
    pub tag: u32,
    pub data: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawTuple {
    pub values: *mut RawIValue,
    pub len: usize,
}

impl RawIValue {
    pub fn tensor(context: TensorContext) -> Self {
        Self {
            tag: IVALUE_TENSOR,
            data: context.as_ptr(),
        }
    }

    pub fn is_tensor(&self) -> bool {
        self.tag == IVALUE_TENSOR
    }

    pub fn is_tuple(&self) -> bool {
        self.tag == IVALUE_TUPLE
    }

    /// Tensor context of a tensor node; `None` for tuples or null pointers.
    pub fn tensor_context(&self) -> Option<TensorContext> {
        if self.is_tensor() {
            TensorContext::from_raw(self.data)
        } else {
            None
        }
    }
}

/// Raw allocation helpers shared with engine implementations that produce result trees.
pub mod raw {
    use std::mem::size_of;
    use std::ptr;
    use std::slice;

    use super::*;

    /// Allocates a tuple record holding a copy of `items`.
    ///
    /// The record and its array come from `malloc`; the array pointer is null when
    /// `items` is empty. Ownership of every child moves into the returned node.
    pub fn alloc_tuple(items: &[RawIValue]) -> Result<RawIValue> {
        let values = if items.is_empty() {
            ptr::null_mut()
        } else {
            let bytes = items
                .len()
                .checked_mul(size_of::<RawIValue>())
                .ok_or_else(|| Error::marshal("tuple node array size overflows"))?;
            // SAFETY: plain allocation of a non-zero size; checked for null below.
            let array = unsafe { libc::malloc(bytes) } as *mut RawIValue;
            if array.is_null() {
                return Err(Error::marshal(format!(
                    "failed to allocate {} tuple nodes",
                    items.len()
                )));
            }
            // SAFETY: array has room for items.len() nodes and does not overlap items.
            unsafe { ptr::copy_nonoverlapping(items.as_ptr(), array, items.len()) };
            array
        };
        // SAFETY: plain allocation; checked for null below.
        let record = unsafe { libc::malloc(size_of::<RawTuple>()) } as *mut RawTuple;
        if record.is_null() {
            // SAFETY: values is null or was just allocated with malloc.
            unsafe { libc::free(values as *mut c_void) };
            return Err(Error::marshal("failed to allocate tuple record"));
        }
        // SAFETY: record points at uninitialized memory sized for a RawTuple.
        unsafe {
            record.write(RawTuple {
                values,
                len: items.len(),
            })
        };
        Ok(RawIValue {
            tag: IVALUE_TUPLE,
            data: record as *mut c_void,
        })
    }

    /// Children of a tuple node.
    ///
    /// # Safety
    /// `node` must be a live tuple node built by [`alloc_tuple`]; the slice is valid until
    /// the node is freed.
    pub unsafe fn tuple_items<'a>(node: &RawIValue) -> Result<&'a [RawIValue]> {
        if !node.is_tuple() {
            return Err(Error::marshal(format!(
                "expected a tuple node, found tag {}",
                node.tag
            )));
        }
        let record = node.data as *const RawTuple;
        if record.is_null() {
            return Err(Error::marshal("tuple node has a null record"));
        }
        let RawTuple { values, len } = *record;
        if len == 0 {
            return Ok(&[]);
        }
        if values.is_null() {
            return Err(Error::marshal(format!(
                "tuple node of length {len} has a null array"
            )));
        }
        Ok(slice::from_raw_parts(values, len))
    }

    /// Frees the record and array of one tuple node, leaving its children alone.
    ///
    /// # Safety
    /// `node` must be a live tuple node built by [`alloc_tuple`]; it is dead afterwards.
    pub(crate) unsafe fn free_tuple_shell(node: RawIValue) {
        let record = node.data as *mut RawTuple;
        if record.is_null() {
            return;
        }
        libc::free((*record).values as *mut c_void);
        libc::free(record as *mut c_void);
    }

    /// Frees every tuple record and array in the tree; tensor leaves are untouched.
    ///
    /// # Safety
    /// `node` must be a live tree whose tuples were built by [`alloc_tuple`]; it is dead
    /// afterwards.
    pub unsafe fn free_tuples(node: RawIValue) {
        if !node.is_tuple() {
            return;
        }
        if let Ok(items) = tuple_items(&node) {
            for item in items {
                free_tuples(*item);
            }
        }
        free_tuple_shell(node);
    }

    /// Frees the whole tree, releasing every tensor leaf through `engine`.
    ///
    /// # Safety
    /// As [`free_tuples`], and every tensor leaf must be a live context owned by the
    /// caller.
    pub unsafe fn free_tree(engine: &dyn NativeEngine, node: RawIValue) {
        if let Some(context) = node.tensor_context() {
            engine.release_tensor(context);
            return;
        }
        if !node.is_tuple() {
            return;
        }
        if let Ok(items) = tuple_items(&node) {
            for item in items {
                free_tree(engine, *item);
            }
        }
        free_tuple_shell(node);
    }
}

/// Argument tree borrowing the tensors of a host [`Value`].
pub struct ArgNode<'a> {
    raw: RawIValue,
    _value: PhantomData<&'a Value>,
}

impl<'a> ArgNode<'a> {
    fn new(raw: RawIValue) -> Self {
        Self {
            raw,
            _value: PhantomData,
        }
    }

    pub fn as_raw(&self) -> RawIValue {
        self.raw
    }

    fn into_raw(self) -> RawIValue {
        ManuallyDrop::new(self).raw
    }
}

impl Drop for ArgNode<'_> {
    fn drop(&mut self) {
        // SAFETY: the tuple structures were allocated by `to_boundary` and are owned by
        // this node alone; leaves belong to the borrowed handles.
        unsafe { raw::free_tuples(self.raw) };
    }
}

impl fmt::Debug for ArgNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgNode").field("tag", &self.raw.tag).finish()
    }
}

/// Builds the boundary tree for `value`.
///
/// Tensor leaves reference the handles' contexts directly, so `value` must outlive the
/// returned node. Every tensor must belong to `engine`. If any child fails, the nodes
/// built so far are freed before the error is returned.
pub fn to_boundary<'a>(engine: &Arc<dyn NativeEngine>, value: &'a Value) -> Result<ArgNode<'a>> {
    match value {
        Value::Tensor(tensor) => {
            if !same_engine(tensor.engine(), engine) {
                return Err(Error::marshal(format!(
                    "tensor created by engine '{}' passed to engine '{}'",
                    tensor.engine().name(),
                    engine.name()
                )));
            }
            Ok(ArgNode::new(RawIValue::tensor(tensor.context())))
        }
        Value::Tuple(items) => {
            let children = items
                .iter()
                .map(|item| to_boundary(engine, item))
                .collect::<Result<Vec<_>>>()?;
            let raws: Vec<RawIValue> = children.iter().map(ArgNode::as_raw).collect();
            let node = raw::alloc_tuple(&raws)?;
            // The new record owns the children's structures from here on.
            children.into_iter().for_each(|child| {
                child.into_raw();
            });
            trace!(len = items.len(), "built tuple boundary node");
            Ok(ArgNode::new(node))
        }
    }
}

/// Result tree returned by an engine call, owned until converted or dropped.
///
/// Conversion consumes the node, so a tree cannot be adopted twice or duplicated:
///
/// ```compile_fail
/// fn convert_twice(node: jitlink::boundary::ResultNode) {
///     let _first = node.into_value();
///     let _second = node.into_value();
/// }
/// ```
///
/// ```compile_fail
/// fn duplicate(node: &jitlink::boundary::ResultNode) -> jitlink::boundary::ResultNode {
///     node.clone()
/// }
/// ```
pub struct ResultNode {
    engine: Arc<dyn NativeEngine>,
    raw: Option<RawIValue>,
}

impl ResultNode {
    /// Takes ownership of an engine-produced tree.
    ///
    /// # Safety
    /// `raw` must be a well-formed tree whose tuples were built with
    /// [`raw::alloc_tuple`] and whose tensor leaves are live contexts of `engine`, owned by
    /// nobody else.
    pub unsafe fn from_raw(engine: Arc<dyn NativeEngine>, raw: RawIValue) -> Self {
        Self {
            engine,
            raw: Some(raw),
        }
    }

    /// Converts the tree into a host [`Value`], adopting every tensor leaf.
    pub fn into_value(mut self) -> Result<Value> {
        let raw = self
            .raw
            .take()
            .ok_or_else(|| Error::marshal("result node already consumed"))?;
        // SAFETY: ownership of the tree was asserted in `from_raw` and is taken out of
        // `self` here, so Drop will not touch it again.
        unsafe { adopt(&self.engine, raw) }
    }
}

impl Drop for ResultNode {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            warn!(tag = raw.tag, "dropping unconsumed engine result");
            // SAFETY: the tree is still exclusively owned by this node.
            unsafe { raw::free_tree(self.engine.as_ref(), raw) };
        }
    }
}

impl fmt::Debug for ResultNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultNode")
            .field("engine", &self.engine.name())
            .field("tag", &self.raw.map(|raw| raw.tag))
            .finish()
    }
}

/// # Safety
/// `node` must satisfy the contract of [`ResultNode::from_raw`]; it is consumed.
unsafe fn adopt(engine: &Arc<dyn NativeEngine>, node: RawIValue) -> Result<Value> {
    match node.tag {
        IVALUE_TENSOR => {
            let context = node
                .tensor_context()
                .ok_or_else(|| Error::marshal("tensor node has a null context"))?;
            Tensor::from_context(Arc::clone(engine), context).map(Value::Tensor)
        }
        IVALUE_TUPLE => {
            let items = match raw::tuple_items(&node) {
                Ok(items) => items,
                Err(err) => {
                    raw::free_tuple_shell(node);
                    return Err(err);
                }
            };
            let mut values = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                match adopt(engine, *item) {
                    Ok(value) => values.push(value),
                    Err(err) => {
                        for rest in &items[index + 1..] {
                            raw::free_tree(engine.as_ref(), *rest);
                        }
                        raw::free_tuple_shell(node);
                        return Err(err);
                    }
                }
            }
            raw::free_tuple_shell(node);
            trace!(len = values.len(), "adopted tuple result");
            Ok(Value::Tuple(values))
        }
        tag => Err(Error::marshal(format!("unknown boundary node tag {tag}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tuples_have_no_array() {
        let node = raw::alloc_tuple(&[]).unwrap();
        assert!(node.is_tuple());
        unsafe {
            assert!(raw::tuple_items(&node).unwrap().is_empty());
            raw::free_tuples(node);
        }
    }

    #[test]
    fn nested_tuples_keep_child_order() {
        let leaf = |n: usize| RawIValue {
            tag: IVALUE_TENSOR,
            data: n as *mut c_void,
        };
        let inner = raw::alloc_tuple(&[leaf(3), leaf(4)]).unwrap();
        let outer = raw::alloc_tuple(&[leaf(1), inner, leaf(2)]).unwrap();
        unsafe {
            let items = raw::tuple_items(&outer).unwrap();
            assert_eq!(items.len(), 3);
            assert_eq!(items[0].data as usize, 1);
            assert_eq!(items[2].data as usize, 2);
            let nested = raw::tuple_items(&items[1]).unwrap();
            assert_eq!(nested[1].data as usize, 4);
            raw::free_tuples(outer);
        }
    }

    #[test]
    fn tensor_nodes_are_not_tuples() {
        let node = RawIValue {
            tag: IVALUE_TENSOR,
            data: 8 as *mut c_void,
        };
        assert!(unsafe { raw::tuple_items(&node) }.is_err());
        assert_eq!(node.tensor_context().map(TensorContext::as_ptr), Some(8 as *mut c_void));
    }
}
