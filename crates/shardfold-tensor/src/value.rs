//! Values stored in a shard: plain arrays and distributed tensor handles

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::tensor::TensorData;

/// How a distributed tensor is laid out across ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Split along `dim`, each rank holding a contiguous slice
    Shard {
        /// Split dimension
        dim: usize,
    },
    /// Every rank holds the full tensor
    Replicate,
}

/// Handle to a tensor split across ranks, holding this rank's local piece
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedTensor {
    /// Locally resident piece
    pub local: TensorData,
    /// Shape of the full, unsharded tensor
    pub global_shape: Vec<usize>,
    /// Layout across ranks
    pub placement: Placement,
}

impl DistributedTensor {
    /// Wrap a local piece
    pub fn new(local: TensorData, global_shape: Vec<usize>, placement: Placement) -> Self {
        Self {
            local,
            global_shape,
            placement,
        }
    }

    /// Turn the handle into its local, fully materialized tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if the local piece cannot belong to the declared
    /// global tensor.
    pub fn materialize(self) -> Result<TensorData, LoadError> {
        let fail = |reason: String| LoadError::Materialize {
            name: self.local.name.clone(),
            reason,
        };

        self.local.check_size().map_err(fail)?;

        let local = &self.local.shape;
        let global = &self.global_shape;
        if local.len() != global.len() {
            return Err(fail(format!(
                "local rank {} differs from global rank {}",
                local.len(),
                global.len()
            )));
        }

        match self.placement {
            Placement::Shard { dim } => {
                if dim >= local.len() {
                    return Err(fail(format!(
                        "shard dim {dim} out of range for {} dims",
                        local.len()
                    )));
                }
                let fits = local
                    .iter()
                    .zip(global)
                    .enumerate()
                    .all(|(axis, (l, g))| if axis == dim { l <= g } else { l == g });
                if !fits {
                    return Err(fail(format!(
                        "local shape {local:?} is not a slice of {global:?} along dim {dim}"
                    )));
                }
            }
            Placement::Replicate => {
                if local != global {
                    return Err(fail(format!(
                        "replicated local shape {local:?} differs from global {global:?}"
                    )));
                }
            }
        }

        Ok(self.local)
    }
}

/// A materialized value, ready for aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayValue {
    /// Dense tensor
    Tensor(TensorData),
    /// Non-array payload (e.g. serialized extra state); has no axis
    Opaque(Bytes),
}

impl ArrayValue {
    /// Borrow the tensor, if this is one
    #[must_use]
    pub fn as_tensor(&self) -> Option<&TensorData> {
        match self {
            Self::Tensor(t) => Some(t),
            Self::Opaque(_) => None,
        }
    }

    /// Raw bytes of the value
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        match self {
            Self::Tensor(t) => &t.data,
            Self::Opaque(b) => b,
        }
    }

    /// Size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.bytes().len() as u64
    }
}

/// A value as stored in a shard file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardValue {
    /// Plain value, used as-is
    Plain(ArrayValue),
    /// Distributed handle, materialized on load
    Distributed(DistributedTensor),
}

impl ShardValue {
    /// Resolve to the locally resident value
    ///
    /// # Errors
    ///
    /// Returns an error if a distributed handle fails to materialize.
    pub fn into_local(self) -> Result<ArrayValue, LoadError> {
        match self {
            Self::Plain(value) => Ok(value),
            Self::Distributed(handle) => handle.materialize().map(ArrayValue::Tensor),
        }
    }
}

impl From<TensorData> for ShardValue {
    fn from(tensor: TensorData) -> Self {
        Self::Plain(ArrayValue::Tensor(tensor))
    }
}

impl From<ArrayValue> for ShardValue {
    fn from(value: ArrayValue) -> Self {
        Self::Plain(value)
    }
}

impl From<DistributedTensor> for ShardValue {
    fn from(handle: DistributedTensor) -> Self {
        Self::Distributed(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_piece() -> TensorData {
        TensorData::from_f32("w", vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
    }

    #[test]
    fn test_materialize_row_shard() {
        let handle = DistributedTensor::new(local_piece(), vec![4, 3], Placement::Shard { dim: 0 });
        let local = handle.materialize().unwrap();
        assert_eq!(local.shape, vec![2, 3]);
        assert_eq!(local.as_f32().unwrap()[5], 6.0);
    }

    #[test]
    fn test_materialize_rejects_foreign_shape() {
        let handle = DistributedTensor::new(local_piece(), vec![4, 4], Placement::Shard { dim: 0 });
        assert!(matches!(
            handle.materialize(),
            Err(LoadError::Materialize { .. })
        ));

        let handle = DistributedTensor::new(local_piece(), vec![4, 3], Placement::Shard { dim: 2 });
        assert!(handle.materialize().is_err());
    }

    #[test]
    fn test_materialize_replicate() {
        let ok = DistributedTensor::new(local_piece(), vec![2, 3], Placement::Replicate);
        assert!(ok.materialize().is_ok());

        let bad = DistributedTensor::new(local_piece(), vec![4, 3], Placement::Replicate);
        assert!(bad.materialize().is_err());
    }

    #[test]
    fn test_into_local_passthrough() {
        let plain = ShardValue::Plain(ArrayValue::Opaque(Bytes::from_static(b"state")));
        assert_eq!(
            plain.into_local().unwrap(),
            ArrayValue::Opaque(Bytes::from_static(b"state"))
        );

        let tensor: ShardValue = local_piece().into();
        assert_eq!(
            tensor.into_local().unwrap().as_tensor().unwrap(),
            &local_piece()
        );
    }
}
