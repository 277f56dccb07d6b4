use crate::error::Result;
use crate::tensor::Tensor;

/// A host-side engine value: a tensor or an ordered tuple of values.
#[derive(Debug)]
pub enum Value {
    Tensor(Tensor),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn tuple<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Value::Tensor(_))
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            Value::Tuple(_) => None,
        }
    }

    pub fn into_tensor(self) -> Option<Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            Value::Tuple(_) => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            Value::Tensor(_) => None,
        }
    }

    pub fn into_tuple(self) -> Option<Vec<Value>> {
        match self {
            Value::Tuple(items) => Some(items),
            Value::Tensor(_) => None,
        }
    }

    /// Tuple element at `index`; `None` for tensors and out-of-range indices.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.as_tuple().and_then(|items| items.get(index))
    }

    /// Number of tensor leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Value::Tensor(_) => 1,
            Value::Tuple(items) => items.iter().map(Value::leaf_count).sum(),
        }
    }

    /// Deep copy; every tensor leaf is cloned through its engine.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(match self {
            Value::Tensor(tensor) => Value::Tensor(tensor.try_clone()?),
            Value::Tuple(items) => Value::Tuple(
                items
                    .iter()
                    .map(Value::try_clone)
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Value::Tensor(tensor)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Tuple(items)
    }
}
