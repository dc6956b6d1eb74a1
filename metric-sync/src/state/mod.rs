mod path;
mod tree;

pub use path::{PathSegment, StatePath};
pub use tree::{Scalar, StateMap, StateTree};
