//! Safetensors output and header inspection, on top of the `safetensors`
//! crate

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::{Error, Result};
use crate::tensor::{TensorData, TensorDtype};

/// Reserved header key for free-form string metadata
pub const METADATA_KEY: &str = "__metadata__";

/// Header entry for one tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Element type
    pub dtype: TensorDtype,
    /// Tensor shape
    pub shape: Vec<usize>,
    /// `[start, end)` within the data section
    pub data_offsets: (usize, usize),
}

/// A tensor paired with the name it is stored under
pub type NamedTensor<'a> = (&'a str, &'a TensorData);

fn to_dtype(dtype: TensorDtype) -> Dtype {
    match dtype {
        TensorDtype::Float32 => Dtype::F32,
        TensorDtype::Float64 => Dtype::F64,
        TensorDtype::Float16 => Dtype::F16,
        TensorDtype::BFloat16 => Dtype::BF16,
        TensorDtype::Int64 => Dtype::I64,
        TensorDtype::Int32 => Dtype::I32,
        TensorDtype::Int16 => Dtype::I16,
        TensorDtype::Int8 => Dtype::I8,
        TensorDtype::UInt8 => Dtype::U8,
        TensorDtype::Bool => Dtype::BOOL,
        TensorDtype::Float8E4M3 => Dtype::F8_E4M3,
        TensorDtype::Float8E5M2 => Dtype::F8_E5M2,
    }
}

fn from_dtype(dtype: Dtype) -> Option<TensorDtype> {
    TensorDtype::from_safetensors_name(&format!("{dtype:?}"))
}

/// Write `tensors` to a safetensors file.
///
/// Data is laid out by the `safetensors` crate (by alignment, then name).
/// Returns the number of tensor data bytes written.
///
/// # Errors
///
/// Fails if a tensor's bytes do not match its shape, or on I/O errors.
pub fn write_safetensors(
    path: &Path,
    tensors: &[NamedTensor<'_>],
    metadata: &BTreeMap<String, String>,
) -> Result<u64> {
    let fail = |e: safetensors::SafeTensorError| {
        Error::Serialization(format!("{}: {e}", path.display()))
    };

    let views = tensors
        .iter()
        .map(|&(name, tensor)| {
            TensorView::new(to_dtype(tensor.dtype), tensor.shape.clone(), tensor.data.as_ref())
                .map(|view| (name, view))
                .map_err(fail)
        })
        .collect::<Result<Vec<_>>>()?;

    let info: Option<HashMap<String, String>> =
        (!metadata.is_empty()).then(|| metadata.clone().into_iter().collect());
    safetensors::serialize_to_file(views, &info, path).map_err(fail)?;

    Ok(tensors.iter().map(|(_, tensor)| tensor.size_bytes()).sum())
}

/// Read the tensor entries of a safetensors file without copying its data.
///
/// # Errors
///
/// Fails if the file cannot be mapped, its header is malformed, or it
/// holds a dtype this crate does not model.
pub fn read_safetensors_header(path: &Path) -> Result<BTreeMap<String, TensorInfo>> {
    let file = File::open(path)?;
    // SAFETY: the file is only read; concurrent truncation is not supported
    let mmap = unsafe { Mmap::map(&file)? };
    let (_, metadata) = SafeTensors::read_metadata(&mmap)
        .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))?;

    metadata
        .tensors()
        .into_iter()
        .map(|(name, info)| {
            let dtype = from_dtype(info.dtype).ok_or_else(|| {
                Error::Serialization(format!(
                    "{}: '{name}' has unsupported dtype {:?}",
                    path.display(),
                    info.dtype
                ))
            })?;
            let entry = TensorInfo {
                dtype,
                shape: info.shape.clone(),
                data_offsets: info.data_offsets,
            };
            Ok::<_, Error>((name, entry))
        })
        .collect()
}
