mod adapter;
mod cpu;

pub use adapter::DeviceAdapter;
pub use cpu::CpuAdapter;
