//! # GCodeKit4
//!
//! A Rust-based CNC streaming core: a G-code virtual machine, a processor
//! pipeline, and a TinyG-style controller session.
//!
//! ## Architecture
//!
//! GCodeKit4 is organized as a workspace with multiple crates:
//!
//! 1. **gcodekit4-core** - `GcodeLine`, the `GcodeVM`, error types, units,
//!    and the diagnostic message bus.
//! 2. **gcodekit4-parser** - the processor chain and concrete processors.
//! 3. **gcodekit4-communication** - serial/TCP transports, the TinyG wire
//!    protocol, and `ControllerSession`.
//! 4. **gcodekit4** - this crate; CLI binary and configuration.

pub use gcodekit4_core::{
    Error, GcodeLine, GcodeVM, LineHookKind, Message, MessageDispatcher, MessageLevel, Result,
    Units, VMState, Word,
};

pub use gcodekit4_parser::{
    Autolevel, FileSource, GcodeSource, MoveSplitter, Processor, ProcessorChain,
    ProcessorChainBuilder, RecoveryReplay, RecoveryTracker, RuntimeOverride, SurfaceMap,
    ToolChange, ToolChangeMacros, VecSource,
};

pub use gcodekit4_communication::{
    list_ports, Communicator, ConnectionDriver, ConnectionParams, ControllerSession,
    NoOpCommunicator, SerialCommunicator, SerialParity, SerialPortInfo, TcpCommunicator,
};

pub mod config;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration.
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
/// - Thread ids and line numbers for diagnostics
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
