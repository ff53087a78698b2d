//! Domain types for the USSD scheduler
//!
//! Devices own SIMs; commands and sessions target one SIM each.

mod carrier;
mod command;
mod device;
mod id;
mod session;
mod sim;

pub use carrier::{Carrier, CommandType};
pub use command::{Command, CommandRequest, CommandStatus};
pub use device::{Device, DeviceStatus};
pub use id::{CommandId, DeviceId, IdResolver, SessionId, SimId, generate_id};
pub use session::{Session, SessionStatus, SessionStep, SessionStepError, StepState};
pub use sim::Sim;
