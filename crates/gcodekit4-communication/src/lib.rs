//! # gcodekit4-communication
//!
//! Serial/TCP transport, the controller wire protocol, and the controller
//! session state machine: send-window flow control, FIFO response
//! matching, and the `stat`-driven ready/paused/moving/error/program
//! reducer.

pub mod communication;
pub mod session;
pub mod wire;

pub use communication::{
    list_ports, Communicator, CommunicatorEvent, CommunicatorListener, CommunicatorListenerHandle,
    ConnectionDriver, ConnectionParams, NoOpCommunicator, SerialCommunicator, SerialParity,
    SerialPortInfo, TcpCommunicator, TcpConnectionInfo,
};
pub use gcodekit4_core::{Error, Result};
pub use session::{ControllerSession, DriverWork, ResumeHandle, SessionStatus, SessionToolChangeController};
pub use wire::{ControlChar, InboundFrame, MachineStat};
