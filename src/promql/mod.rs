pub mod annotations;
pub mod ast;
pub mod binary;
pub mod duration;
pub mod functions;
pub mod serialize;
pub mod translate;
pub mod types;

// Re-export the public API
pub use annotations::get_node_annotations;
pub use ast::Node;
pub use binary::{compute_vector_scalar_bin_op, compute_vector_vector_bin_op};
pub use serialize::{serialize, serialize_pretty};
pub use translate::parse;
