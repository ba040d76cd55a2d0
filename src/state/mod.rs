pub mod export;
pub mod reducer;
pub mod tree;

pub use export::{ExportedState, ImportError, export_state, import_state};
pub use reducer::{Action, AppState, GlobalNodeId, Query, ServerSettings};
pub use tree::{IdAllocator, NodeId, Tree, denormalize, normalize};
