//! Tensor types

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Tensor data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorDtype {
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// 16-bit floating point (IEEE)
    Float16,
    /// Brain floating point (bfloat16)
    BFloat16,
    /// 64-bit signed integer
    Int64,
    /// 32-bit signed integer
    Int32,
    /// 16-bit signed integer
    Int16,
    /// 8-bit signed integer
    Int8,
    /// 8-bit unsigned integer
    UInt8,
    /// Boolean
    Bool,
    /// 8-bit float (E4M3)
    Float8E4M3,
    /// 8-bit float (E5M2)
    Float8E5M2,
}

impl TensorDtype {
    /// Get the size of one element in bytes
    #[must_use]
    pub fn element_size(&self) -> usize {
        match self {
            Self::Float64 | Self::Int64 => 8,
            Self::Float32 | Self::Int32 => 4,
            Self::Float16 | Self::BFloat16 | Self::Int16 => 2,
            Self::Int8 | Self::UInt8 | Self::Bool | Self::Float8E4M3 | Self::Float8E5M2 => 1,
        }
    }

    /// Dtype tag used in safetensors headers
    #[must_use]
    pub fn safetensors_name(&self) -> &'static str {
        match self {
            Self::Float32 => "F32",
            Self::Float64 => "F64",
            Self::Float16 => "F16",
            Self::BFloat16 => "BF16",
            Self::Int64 => "I64",
            Self::Int32 => "I32",
            Self::Int16 => "I16",
            Self::Int8 => "I8",
            Self::UInt8 => "U8",
            Self::Bool => "BOOL",
            Self::Float8E4M3 => "F8_E4M3",
            Self::Float8E5M2 => "F8_E5M2",
        }
    }

    /// Parse a safetensors dtype tag
    #[must_use]
    pub fn from_safetensors_name(name: &str) -> Option<Self> {
        match name {
            "F32" => Some(Self::Float32),
            "F64" => Some(Self::Float64),
            "F16" => Some(Self::Float16),
            "BF16" => Some(Self::BFloat16),
            "I64" => Some(Self::Int64),
            "I32" => Some(Self::Int32),
            "I16" => Some(Self::Int16),
            "I8" => Some(Self::Int8),
            "U8" => Some(Self::UInt8),
            "BOOL" => Some(Self::Bool),
            "F8_E4M3" => Some(Self::Float8E4M3),
            "F8_E5M2" => Some(Self::Float8E5M2),
            _ => None,
        }
    }
}

impl std::fmt::Display for TensorDtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.safetensors_name())
    }
}

/// A dense, row-major, little-endian tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorData {
    /// Parameter name
    pub name: String,
    /// Element type
    pub dtype: TensorDtype,
    /// Shape; empty for a 0-dim scalar
    pub shape: Vec<usize>,
    /// Raw element bytes
    pub data: Bytes,
}

impl TensorData {
    /// Create new tensor data without checking the byte length
    pub fn new(name: impl Into<String>, dtype: TensorDtype, shape: Vec<usize>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            data,
        }
    }

    /// Create tensor from f32 slice
    pub fn from_f32(name: impl Into<String>, shape: Vec<usize>, data: &[f32]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
        Self::new(name, TensorDtype::Float32, shape, Bytes::from(bytes))
    }

    /// Create tensor from f64 slice
    pub fn from_f64(name: impl Into<String>, shape: Vec<usize>, data: &[f64]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
        Self::new(name, TensorDtype::Float64, shape, Bytes::from(bytes))
    }

    /// Create tensor from i64 slice
    pub fn from_i64(name: impl Into<String>, shape: Vec<usize>, data: &[i64]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|i| i.to_le_bytes()).collect();
        Self::new(name, TensorDtype::Int64, shape, Bytes::from(bytes))
    }

    /// Create tensor from i32 slice
    pub fn from_i32(name: impl Into<String>, shape: Vec<usize>, data: &[i32]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|i| i.to_le_bytes()).collect();
        Self::new(name, TensorDtype::Int32, shape, Bytes::from(bytes))
    }

    /// Get data as f32 values
    #[must_use]
    pub fn as_f32(&self) -> Option<Vec<f32>> {
        if self.dtype != TensorDtype::Float32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Get data as i64 values
    #[must_use]
    pub fn as_i64(&self) -> Option<Vec<i64>> {
        if self.dtype != TensorDtype::Int64 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        )
    }

    /// Get name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements (1 for a scalar), `None` if it overflows `usize`
    #[must_use]
    pub fn numel(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Size in bytes implied by shape and dtype, `None` on overflow
    #[must_use]
    pub fn expected_size(&self) -> Option<usize> {
        self.numel()?.checked_mul(self.dtype.element_size())
    }

    /// Get size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// Check the byte length against shape and dtype
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch.
    pub fn check_size(&self) -> std::result::Result<(), String> {
        let Some(expected) = self.expected_size() else {
            return Err(format!(
                "'{}' has shape {:?} whose byte size overflows",
                self.name, self.shape
            ));
        };
        if self.data.len() == expected {
            Ok(())
        } else {
            Err(format!(
                "'{}' has {} bytes, shape {:?} of {} needs {expected}",
                self.name,
                self.data.len(),
                self.shape,
                self.dtype
            ))
        }
    }

    /// Bytes occupied by one index along axis 0, `None` on overflow
    #[must_use]
    pub fn row_bytes(&self) -> Option<usize> {
        self.shape
            .iter()
            .skip(1)
            .try_fold(self.dtype.element_size(), |acc, &dim| acc.checked_mul(dim))
    }

    /// Rows `start..end` along axis 0, sharing the underlying buffer
    #[must_use]
    pub fn slice_rows(&self, start: usize, end: usize) -> Option<Self> {
        let first = *self.shape.first()?;
        if start > end || end > first {
            return None;
        }
        let row = self.row_bytes()?;
        let (from, to) = (start.checked_mul(row)?, end.checked_mul(row)?);
        if to > self.data.len() {
            return None;
        }
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        Some(Self::new(
            self.name.clone(),
            self.dtype,
            shape,
            self.data.slice(from..to),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_dtype_size() {
        assert_eq!(TensorDtype::Float32.element_size(), 4);
        assert_eq!(TensorDtype::Float64.element_size(), 8);
        assert_eq!(TensorDtype::Float16.element_size(), 2);
        assert_eq!(TensorDtype::BFloat16.element_size(), 2);
        assert_eq!(TensorDtype::Int8.element_size(), 1);
    }

    #[test]
    fn test_safetensors_names() {
        assert_eq!(TensorDtype::BFloat16.safetensors_name(), "BF16");
        assert_eq!(
            TensorDtype::from_safetensors_name("F8_E4M3"),
            Some(TensorDtype::Float8E4M3)
        );
        assert_eq!(TensorDtype::from_safetensors_name("f32"), None);
    }

    #[test]
    fn test_tensor_data_f32() {
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let tensor = TensorData::from_f32("test", vec![2, 2], &data);

        assert_eq!(tensor.name(), "test");
        assert_eq!(tensor.shape(), &[2, 2]);
        assert_eq!(tensor.dtype, TensorDtype::Float32);
        assert_eq!(tensor.as_f32().unwrap(), data);
        assert!(tensor.as_i64().is_none());
        assert!(tensor.check_size().is_ok());
    }

    #[test]
    fn test_scalar_tensor() {
        let scalar = TensorData::from_i64("step", vec![], &[42]);
        assert_eq!(scalar.numel(), Some(1));
        assert_eq!(scalar.expected_size(), Some(8));
        assert!(scalar.slice_rows(0, 1).is_none());
    }

    #[test]
    fn test_check_size_mismatch() {
        let tensor = TensorData::new(
            "short",
            TensorDtype::Float32,
            vec![3],
            Bytes::from_static(&[0u8; 8]),
        );
        let err = tensor.check_size().unwrap_err();
        assert!(err.contains("needs 12"));
    }

    #[test]
    fn test_overflowing_shape() {
        let tensor = TensorData::new("huge", TensorDtype::Float32, vec![usize::MAX, 2], Bytes::new());
        assert_eq!(tensor.numel(), None);
        assert_eq!(tensor.expected_size(), None);
        assert_eq!(tensor.row_bytes(), Some(8));
        assert!(tensor.check_size().unwrap_err().contains("overflows"));
        assert!(tensor.slice_rows(0, 1).is_none());

        let wide = TensorData::new("wide", TensorDtype::Int8, vec![1, usize::MAX, 2], Bytes::new());
        assert_eq!(wide.row_bytes(), None);
    }

    #[test]
    fn test_slice_rows() {
        let tensor = TensorData::from_f32("m", vec![3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(tensor.row_bytes(), Some(8));

        let middle = tensor.slice_rows(1, 2).unwrap();
        assert_eq!(middle.shape, vec![1, 2]);
        assert_eq!(middle.as_f32().unwrap(), vec![3.0, 4.0]);

        assert!(tensor.slice_rows(2, 4).is_none());
    }
}
