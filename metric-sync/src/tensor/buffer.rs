use super::element::{Element, element_to_f64};
use crate::error::{Result, SyncError};
use crate::types::{DataType, Device};

/// A fixed-shape numeric buffer: dtype, shape, little-endian bytes and a
/// placement label.
///
/// This is the crate's stand-in for an external tensor runtime. It owns its
/// bytes on the host; the [`Device`] label tells a
/// [`DeviceAdapter`](crate::device::DeviceAdapter) where the buffer is meant
/// to live.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DataType,
    shape: Vec<usize>,
    data: Vec<u8>,
    device: Device,
}

/// Number of elements described by `shape`. A zero-dim shape holds one.
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl Tensor {
    /// Wrap raw little-endian bytes, validating their length against the shape.
    pub fn from_raw(
        dtype: DataType,
        shape: Vec<usize>,
        data: Vec<u8>,
        device: Device,
    ) -> Result<Self> {
        let expected = numel(&shape) * dtype.size_in_bytes();
        if data.len() != expected {
            return Err(SyncError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            dtype,
            shape,
            data,
            device,
        })
    }

    /// Build a host tensor from typed values.
    pub fn from_vec<T: Element>(values: Vec<T>, shape: &[usize]) -> Result<Self> {
        let elem = T::DTYPE.size_in_bytes();
        if values.len() != numel(shape) {
            return Err(SyncError::BufferSizeMismatch {
                expected: numel(shape) * elem,
                actual: values.len() * elem,
            });
        }
        let mut data = vec![0u8; values.len() * elem];
        for (v, chunk) in values.into_iter().zip(data.chunks_exact_mut(elem)) {
            v.write_le(chunk);
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape: shape.to_vec(),
            data,
            device: Device::Cpu,
        })
    }

    /// Zero-dim host tensor holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        let mut data = vec![0u8; T::DTYPE.size_in_bytes()];
        value.write_le(&mut data);
        Self {
            dtype: T::DTYPE,
            shape: Vec::new(),
            data,
            device: Device::Cpu,
        }
    }

    /// One-dimensional host tensor.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let elem = T::DTYPE.size_in_bytes();
        let mut data = vec![0u8; values.len() * elem];
        for (v, chunk) in values.iter().zip(data.chunks_exact_mut(elem)) {
            v.write_le(chunk);
        }
        Self {
            dtype: T::DTYPE,
            shape: vec![values.len()],
            data,
            device: Device::Cpu,
        }
    }

    /// Zero-initialized tensor.
    pub fn zeros(dtype: DataType, shape: &[usize], device: Device) -> Self {
        Self {
            dtype,
            shape: shape.to_vec(),
            data: vec![0u8; numel(shape) * dtype.size_in_bytes()],
            device,
        }
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Relabel the tensor's placement.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Read the elements back as `T`, which must match the tensor's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(SyncError::DTypeMismatch {
                expected: self.dtype,
                actual: T::DTYPE,
            });
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.size_in_bytes())
            .map(T::read_le)
            .collect())
    }

    /// Every element widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.data
            .chunks_exact(self.dtype.size_in_bytes())
            .map(|b| element_to_f64(self.dtype, b))
            .collect()
    }

    /// Element-wise closeness: same shape and `|a - b| <= atol + rtol * |b|`.
    ///
    /// Dtypes may differ; values are compared after widening to `f64`.
    pub fn allclose(&self, other: &Tensor, rtol: f64, atol: f64) -> bool {
        if self.shape != other.shape {
            return false;
        }
        self.to_f64_vec()
            .into_iter()
            .zip(other.to_f64_vec())
            .all(|(a, b)| {
                if a.is_nan() || b.is_nan() {
                    return a.is_nan() && b.is_nan();
                }
                a == b || (a - b).abs() <= atol + rtol * b.abs()
            })
    }

    /// Split along dimension 0 into `shape[0]` tensors of shape `shape[1..]`.
    ///
    /// Returns `None` for a zero-dim tensor.
    pub fn unbind(&self) -> Option<Vec<Tensor>> {
        let (&rows, inner) = self.shape.split_first()?;
        let row_bytes = numel(inner) * self.dtype.size_in_bytes();
        let mut out = Vec::with_capacity(rows);
        for i in 0..rows {
            out.push(Tensor {
                dtype: self.dtype,
                shape: inner.to_vec(),
                data: self.data[i * row_bytes..(i + 1) * row_bytes].to_vec(),
                device: self.device,
            });
        }
        Some(out)
    }
}
