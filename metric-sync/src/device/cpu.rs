use crate::device::adapter::DeviceAdapter;
use crate::error::{Result, SyncError};
use crate::tensor::Tensor;
use crate::types::{DataType, Device};

/// DeviceAdapter for host (CPU) buffers. Bytes are already on the host.
#[derive(Debug, Clone, Default)]
pub struct CpuAdapter;

impl CpuAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceAdapter for CpuAdapter {
    fn supports(&self, device: Device) -> bool {
        device == Device::Cpu
    }

    fn stage_for_send(&self, tensor: &Tensor) -> Result<Vec<u8>> {
        if !self.supports(tensor.device()) {
            return Err(SyncError::UnsupportedDevice {
                device: tensor.device(),
            });
        }
        Ok(tensor.as_bytes().to_vec())
    }

    fn receive_to_device(
        &self,
        data: Vec<u8>,
        dtype: DataType,
        shape: &[usize],
        device: Device,
    ) -> Result<Tensor> {
        if !self.supports(device) {
            return Err(SyncError::UnsupportedDevice { device });
        }
        Tensor::from_raw(dtype, shape.to_vec(), data, device)
    }
}
