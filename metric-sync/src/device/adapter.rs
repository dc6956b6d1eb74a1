use crate::error::Result;
use crate::tensor::{Tensor, numel};
use crate::types::{DataType, Device};

/// Bridges a tensor runtime with the synchronization protocol.
///
/// The protocol moves plain little-endian bytes. A `DeviceAdapter` stages a
/// buffer's bytes out of wherever it lives before a collective and
/// materializes received bytes as a buffer on the requested device after.
///
/// - `CpuAdapter` (built-in): host buffers only, no copies beyond the gather.
/// - Accelerator adapters: device-to-host / host-to-device copies
///   (implemented externally).
pub trait DeviceAdapter: Send + Sync {
    /// Whether buffers can be staged from and materialized on `device`.
    fn supports(&self, device: Device) -> bool;

    /// Copy a buffer's bytes into host memory for sending.
    fn stage_for_send(&self, tensor: &Tensor) -> Result<Vec<u8>>;

    /// Materialize received host bytes as a buffer on `device`.
    ///
    /// `data.len()` must equal `numel(shape) * dtype.size_in_bytes()`.
    fn receive_to_device(
        &self,
        data: Vec<u8>,
        dtype: DataType,
        shape: &[usize],
        device: Device,
    ) -> Result<Tensor>;

    /// Allocate a zero-initialized buffer on `device`.
    ///
    /// Default implementation materializes a zeroed host buffer via
    /// `receive_to_device`.
    fn zeros(&self, dtype: DataType, shape: &[usize], device: Device) -> Result<Tensor> {
        let bytes = vec![0u8; numel(shape) * dtype.size_in_bytes()];
        self.receive_to_device(bytes, dtype, shape, device)
    }
}
