mod buffer;
mod element;

pub use buffer::{Tensor, numel};
pub use element::{Bf16, Element, F16};
