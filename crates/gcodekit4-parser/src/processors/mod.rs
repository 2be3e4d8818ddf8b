//! Concrete processor implementations.

pub mod autolevel;
pub mod move_splitter;
pub mod recovery;
pub mod runtime_override;
pub mod surface_map;
pub mod tool_change;

pub use autolevel::Autolevel;
pub use move_splitter::MoveSplitter;
pub use recovery::{RecoveryMacros, RecoveryReplay, RecoverySnapshot, RecoveryTracker};
pub use runtime_override::{RuntimeOverride, RuntimeOverrideHandle};
pub use surface_map::{SurfaceMap, SurfacePoint};
pub use tool_change::{NullToolChangeController, ToolChange, ToolChangeController, ToolChangeMacros};
