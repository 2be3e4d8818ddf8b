//! # gcodekit4-parser
//!
//! The G-code processor pipeline: a source abstraction, the `Processor`
//! capability set and chain builder, and the concrete stream processors
//! (move splitting, autoleveling, tool change, crash recovery, and
//! runtime feed override).

pub mod processor;
pub mod processors;
pub mod source;

pub use processor::{Processor, ProcessorChain, ProcessorChainBuilder};
pub use processors::{
    Autolevel, MoveSplitter, NullToolChangeController, RecoveryMacros, RecoveryReplay,
    RecoverySnapshot, RecoveryTracker, RuntimeOverride, RuntimeOverrideHandle, SurfaceMap,
    SurfacePoint, ToolChange, ToolChangeController, ToolChangeMacros,
};
pub use source::{FileSource, GcodeSource, VecSource};
