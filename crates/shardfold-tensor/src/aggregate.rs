//! Parameter aggregation across ranks

use std::collections::{BTreeMap, HashMap};

use bytes::BytesMut;
use shardfold_config::{AggregateConfig, CoveragePolicy, ReplicaPolicy};

use crate::error::{Error, Result};
use crate::loader::RawShard;
use crate::observer::ConsolidationObserver;
use crate::tensor::{TensorData, TensorDtype};
use crate::value::ArrayValue;

/// Why a sequence of values cannot be concatenated along axis 0
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConcatError {
    /// No values at all
    #[error("nothing to concatenate")]
    Empty,
    /// A value is not a tensor
    #[error("value {index} is not a tensor")]
    NotATensor {
        /// Position in the sequence
        index: usize,
    },
    /// A value has no axis 0
    #[error("value {index} is zero-dimensional")]
    ZeroDim {
        /// Position in the sequence
        index: usize,
    },
    /// Element types differ
    #[error("value {index} has dtype {found}, expected {expected}")]
    DtypeMismatch {
        /// Position in the sequence
        index: usize,
        /// Dtype of the first value
        expected: TensorDtype,
        /// Dtype of this value
        found: TensorDtype,
    },
    /// Number of dimensions differs
    #[error("value {index} has {found} dims, expected {expected}")]
    RankMismatch {
        /// Position in the sequence
        index: usize,
        /// Dims of the first value
        expected: usize,
        /// Dims of this value
        found: usize,
    },
    /// Dimensions past axis 0 differ
    #[error("value {index} has shape {found:?}, incompatible with {expected:?}")]
    ShapeMismatch {
        /// Position in the sequence
        index: usize,
        /// Shape of the first value
        expected: Vec<usize>,
        /// Shape of this value
        found: Vec<usize>,
    },
    /// Combined axis 0 length does not fit in `usize`
    #[error("value {index} overflows the concatenated length")]
    TooLarge {
        /// Position in the sequence
        index: usize,
    },
}

/// Concatenate tensors along axis 0 in sequence order.
///
/// # Errors
///
/// Returns a `ConcatError` when the sequence is structurally not
/// concatenable; callers treat that as a replicated parameter.
pub fn try_concatenate(values: &[ArrayValue]) -> std::result::Result<TensorData, ConcatError> {
    let mut tensors = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let tensor = value.as_tensor().ok_or(ConcatError::NotATensor { index })?;
        if tensor.shape.is_empty() {
            return Err(ConcatError::ZeroDim { index });
        }
        tensors.push(tensor);
    }

    let Some(first) = tensors.first() else {
        return Err(ConcatError::Empty);
    };

    for (index, tensor) in tensors.iter().enumerate().skip(1) {
        if tensor.dtype != first.dtype {
            return Err(ConcatError::DtypeMismatch {
                index,
                expected: first.dtype,
                found: tensor.dtype,
            });
        }
        if tensor.shape.len() != first.shape.len() {
            return Err(ConcatError::RankMismatch {
                index,
                expected: first.shape.len(),
                found: tensor.shape.len(),
            });
        }
        if tensor.shape[1..] != first.shape[1..] {
            return Err(ConcatError::ShapeMismatch {
                index,
                expected: first.shape.clone(),
                found: tensor.shape.clone(),
            });
        }
    }

    if tensors.len() == 1 {
        return Ok((*first).clone());
    }

    let mut rows = 0usize;
    for (index, tensor) in tensors.iter().enumerate() {
        rows = rows
            .checked_add(tensor.shape[0])
            .ok_or(ConcatError::TooLarge { index })?;
    }
    let total_size: usize = tensors.iter().map(|t| t.data.len()).sum();
    let mut data = BytesMut::with_capacity(total_size);
    for tensor in &tensors {
        data.extend_from_slice(&tensor.data);
    }

    let mut shape = first.shape.clone();
    shape[0] = rows;
    Ok(TensorData::new(
        first.name.clone(),
        first.dtype,
        shape,
        data.freeze(),
    ))
}

/// How a consolidated value was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Concatenated along axis 0 across ranks
    Concatenated,
    /// Not concatenable; first holder's value taken verbatim
    FirstShard,
    /// Identical on every holder; first holder's value kept
    Deduplicated,
}

#[derive(Debug, Default)]
struct Group {
    ranks: Vec<usize>,
    values: Vec<ArrayValue>,
}

/// Per-parameter sequences of rank values, in fold order
#[derive(Debug)]
pub struct AggregationBuffer {
    world_size: usize,
    order: Vec<String>,
    groups: HashMap<String, Group>,
    last_rank: Option<usize>,
}

impl AggregationBuffer {
    /// Create an empty buffer for `world_size` ranks
    #[must_use]
    pub fn new(world_size: usize) -> Self {
        Self {
            world_size,
            order: Vec::new(),
            groups: HashMap::new(),
            last_rank: None,
        }
    }

    /// Append every value of `shard` to its parameter's sequence.
    ///
    /// Shards must be folded in ascending rank order; the shard is consumed
    /// so its memory is released as soon as its values move into the buffer.
    pub fn fold(&mut self, shard: RawShard) {
        debug_assert!(
            self.last_rank.is_none_or(|last| shard.rank > last),
            "shards must be folded in ascending rank order"
        );
        self.last_rank = Some(shard.rank);

        for (name, value) in shard.entries {
            if !self.groups.contains_key(&name) {
                self.order.push(name.clone());
            }
            let group = self.groups.entry(name).or_default();
            group.ranks.push(shard.rank);
            group.values.push(value);
        }
    }

    /// Number of distinct parameters seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing has been folded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Merge each parameter's sequence into one value.
    ///
    /// # Errors
    ///
    /// Returns `Error::InconsistentParameterSet` under strict coverage when a
    /// parameter is missing from some rank.
    pub fn finish(
        mut self,
        config: &AggregateConfig,
        observer: &dyn ConsolidationObserver,
    ) -> Result<ConsolidatedState> {
        let mut state = ConsolidatedState::new(self.world_size);

        for name in std::mem::take(&mut self.order) {
            let Some(Group { ranks, values }) = self.groups.remove(&name) else {
                continue;
            };

            if ranks.len() < self.world_size {
                observer.partial_coverage(&name, &ranks, self.world_size);
                if config.coverage == CoveragePolicy::Strict {
                    return Err(Error::InconsistentParameterSet {
                        name,
                        present: ranks.len(),
                        world_size: self.world_size,
                    });
                }
            }

            let (value, merge) = match try_concatenate(&values) {
                Ok(merged) if values.len() > 1 && all_identical(&values) => {
                    let dedup = config.replicas == ReplicaPolicy::Deduplicate;
                    observer.suspected_replica(&name, values.len(), dedup);
                    if dedup {
                        (first_value(values), MergeKind::Deduplicated)
                    } else {
                        (ArrayValue::Tensor(merged), MergeKind::Concatenated)
                    }
                }
                Ok(merged) => (ArrayValue::Tensor(merged), MergeKind::Concatenated),
                Err(reason) => {
                    observer.concat_fallback(&name, &reason);
                    (first_value(values), MergeKind::FirstShard)
                }
            };

            state.insert(name, value, merge);
        }

        Ok(state)
    }
}

/// The first holder's value; a group always has at least one
fn first_value(values: Vec<ArrayValue>) -> ArrayValue {
    values
        .into_iter()
        .next()
        .unwrap_or_else(|| ArrayValue::Opaque(bytes::Bytes::new()))
}

fn all_identical(values: &[ArrayValue]) -> bool {
    let Some((first, rest)) = values.split_first() else {
        return false;
    };
    rest.iter().all(|v| match (first, v) {
        (ArrayValue::Tensor(a), ArrayValue::Tensor(b)) => {
            a.dtype == b.dtype && a.shape == b.shape && a.data == b.data
        }
        (a, b) => a == b,
    })
}

/// Fully merged parameters, ordered by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedState {
    world_size: usize,
    parameters: BTreeMap<String, ArrayValue>,
    merges: BTreeMap<String, MergeKind>,
}

impl ConsolidatedState {
    /// Empty state for a checkpoint of `world_size` ranks
    #[must_use]
    pub fn new(world_size: usize) -> Self {
        Self {
            world_size,
            parameters: BTreeMap::new(),
            merges: BTreeMap::new(),
        }
    }

    fn insert(&mut self, name: String, value: ArrayValue, merge: MergeKind) {
        self.merges.insert(name.clone(), merge);
        self.parameters.insert(name, value);
    }

    /// World size of the source checkpoint
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Look up a parameter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArrayValue> {
        self.parameters.get(name)
    }

    /// Look up a tensor parameter
    #[must_use]
    pub fn tensor(&self, name: &str) -> Option<&TensorData> {
        self.get(name).and_then(ArrayValue::as_tensor)
    }

    /// How a parameter was produced
    #[must_use]
    pub fn merge_kind(&self, name: &str) -> Option<MergeKind> {
        self.merges.get(name).copied()
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether there are no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Parameter names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    /// Iterate parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayValue)> {
        self.parameters.iter()
    }

    /// Tensor parameters in name order
    pub fn tensors(&self) -> impl Iterator<Item = (&String, &TensorData)> {
        self.parameters
            .iter()
            .filter_map(|(name, value)| value.as_tensor().map(|t| (name, t)))
    }

    /// Total bytes of tensor parameters
    #[must_use]
    pub fn tensor_bytes(&self) -> u64 {
        self.tensors().map(|(_, t)| t.size_bytes()).sum()
    }

    /// Hand the parameter mapping over
    #[must_use]
    pub fn into_parameters(self) -> BTreeMap<String, ArrayValue> {
        self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::TracingObserver;
    use bytes::Bytes;
    use parking_lot::Mutex;

    fn t(values: &[f32], shape: Vec<usize>) -> ArrayValue {
        ArrayValue::Tensor(TensorData::from_f32("p", shape, values))
    }

    fn shard(rank: usize, entries: Vec<(&str, ArrayValue)>) -> RawShard {
        RawShard {
            rank,
            entries: entries
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        }
    }

    #[derive(Default)]
    struct Recorder {
        fallbacks: Mutex<Vec<String>>,
        replicas: Mutex<Vec<(String, bool)>>,
        partial: Mutex<Vec<(String, Vec<usize>)>>,
    }

    impl ConsolidationObserver for Recorder {
        fn concat_fallback(&self, name: &str, _reason: &ConcatError) {
            self.fallbacks.lock().push(name.to_string());
        }
        fn suspected_replica(&self, name: &str, _ranks: usize, deduplicated: bool) {
            self.replicas.lock().push((name.to_string(), deduplicated));
        }
        fn partial_coverage(&self, name: &str, ranks: &[usize], _world_size: usize) {
            self.partial.lock().push((name.to_string(), ranks.to_vec()));
        }
    }

    #[test]
    fn test_concat_rows() {
        let merged = try_concatenate(&[
            t(&[1.0, 2.0, 3.0, 4.0], vec![2, 2]),
            t(&[5.0, 6.0], vec![1, 2]),
        ])
        .unwrap();
        assert_eq!(merged.shape, vec![3, 2]);
        assert_eq!(merged.as_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_concat_errors() {
        assert_eq!(try_concatenate(&[]), Err(ConcatError::Empty));
        assert_eq!(
            try_concatenate(&[t(&[1.0], vec![]), t(&[1.0], vec![])]),
            Err(ConcatError::ZeroDim { index: 0 })
        );
        assert_eq!(
            try_concatenate(&[t(&[1.0], vec![1]), ArrayValue::Opaque(Bytes::new())]),
            Err(ConcatError::NotATensor { index: 1 })
        );
        assert!(matches!(
            try_concatenate(&[t(&[1.0, 2.0], vec![1, 2]), t(&[1.0, 2.0, 3.0], vec![1, 3])]),
            Err(ConcatError::ShapeMismatch { index: 1, .. })
        ));
        assert!(matches!(
            try_concatenate(&[t(&[1.0, 2.0], vec![2]), t(&[1.0, 2.0], vec![1, 2])]),
            Err(ConcatError::RankMismatch { index: 1, .. })
        ));
        let ints = ArrayValue::Tensor(TensorData::from_i64("p", vec![1], &[1]));
        assert!(matches!(
            try_concatenate(&[t(&[1.0], vec![1]), ints]),
            Err(ConcatError::DtypeMismatch { index: 1, .. })
        ));
        assert_eq!(
            try_concatenate(&[t(&[], vec![usize::MAX, 0]), t(&[], vec![1, 0])]),
            Err(ConcatError::TooLarge { index: 1 })
        );
    }

    #[test]
    fn test_single_value_concat() {
        let merged = try_concatenate(&[t(&[1.0, 2.0], vec![2])]).unwrap();
        assert_eq!(merged.as_f32().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_fold_and_finish_sharded() {
        let mut buffer = AggregationBuffer::new(2);
        buffer.fold(shard(0, vec![("w", t(&[1.0, 2.0], vec![2]))]));
        buffer.fold(shard(1, vec![("w", t(&[3.0, 4.0], vec![2]))]));

        let state = buffer
            .finish(&AggregateConfig::default(), &TracingObserver)
            .unwrap();
        assert_eq!(state.tensor("w").unwrap().as_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(state.merge_kind("w"), Some(MergeKind::Concatenated));
    }

    #[test]
    fn test_scalar_falls_back_to_rank_zero() {
        let recorder = Recorder::default();
        let mut buffer = AggregationBuffer::new(3);
        for (rank, v) in [(0, 0.5), (1, 0.7), (2, 0.9)] {
            buffer.fold(shard(rank, vec![("scale", t(&[v], vec![]))]));
        }

        let state = buffer.finish(&AggregateConfig::default(), &recorder).unwrap();
        assert_eq!(state.tensor("scale").unwrap().as_f32().unwrap(), vec![0.5]);
        assert_eq!(state.merge_kind("scale"), Some(MergeKind::FirstShard));
        assert_eq!(*recorder.fallbacks.lock(), vec!["scale".to_string()]);
    }

    #[test]
    fn test_opaque_falls_back() {
        let mut buffer = AggregationBuffer::new(2);
        buffer.fold(shard(0, vec![("extra", ArrayValue::Opaque(Bytes::from_static(b"a")))]));
        buffer.fold(shard(1, vec![("extra", ArrayValue::Opaque(Bytes::from_static(b"b")))]));

        let state = buffer
            .finish(&AggregateConfig::default(), &TracingObserver)
            .unwrap();
        assert_eq!(
            state.get("extra"),
            Some(&ArrayValue::Opaque(Bytes::from_static(b"a")))
        );
    }

    #[test]
    fn test_identical_values_concatenated_by_default() {
        let recorder = Recorder::default();
        let mut buffer = AggregationBuffer::new(2);
        buffer.fold(shard(0, vec![("b", t(&[5.0], vec![1]))]));
        buffer.fold(shard(1, vec![("b", t(&[5.0], vec![1]))]));

        let state = buffer.finish(&AggregateConfig::default(), &recorder).unwrap();
        assert_eq!(state.tensor("b").unwrap().as_f32().unwrap(), vec![5.0, 5.0]);
        assert_eq!(*recorder.replicas.lock(), vec![("b".to_string(), false)]);
    }

    #[test]
    fn test_identical_values_deduplicated() {
        let config = AggregateConfig {
            replicas: ReplicaPolicy::Deduplicate,
            ..AggregateConfig::default()
        };
        let mut buffer = AggregationBuffer::new(2);
        buffer.fold(shard(0, vec![("b", t(&[5.0], vec![1])), ("w", t(&[1.0], vec![1]))]));
        buffer.fold(shard(1, vec![("b", t(&[5.0], vec![1])), ("w", t(&[2.0], vec![1]))]));

        let state = buffer.finish(&config, &TracingObserver).unwrap();
        assert_eq!(state.tensor("b").unwrap().as_f32().unwrap(), vec![5.0]);
        assert_eq!(state.merge_kind("b"), Some(MergeKind::Deduplicated));
        assert_eq!(state.tensor("w").unwrap().as_f32().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_partial_coverage_union() {
        let recorder = Recorder::default();
        let mut buffer = AggregationBuffer::new(3);
        buffer.fold(shard(0, vec![("w", t(&[1.0], vec![1]))]));
        buffer.fold(shard(1, vec![("w", t(&[2.0], vec![1])), ("late", t(&[9.0], vec![1]))]));
        buffer.fold(shard(2, vec![("w", t(&[3.0], vec![1]))]));

        let state = buffer.finish(&AggregateConfig::default(), &recorder).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.tensor("late").unwrap().as_f32().unwrap(), vec![9.0]);
        assert_eq!(
            *recorder.partial.lock(),
            vec![("late".to_string(), vec![1])]
        );
    }

    #[test]
    fn test_partial_coverage_strict() {
        let config = AggregateConfig {
            coverage: CoveragePolicy::Strict,
            ..AggregateConfig::default()
        };
        let mut buffer = AggregationBuffer::new(2);
        buffer.fold(shard(0, vec![("w", t(&[1.0], vec![1])), ("only0", t(&[1.0], vec![1]))]));
        buffer.fold(shard(1, vec![("w", t(&[2.0], vec![1]))]));

        let err = buffer.finish(&config, &TracingObserver).unwrap_err();
        assert!(matches!(
            err,
            Error::InconsistentParameterSet { ref name, present: 1, world_size: 2 } if name == "only0"
        ));
    }
}
