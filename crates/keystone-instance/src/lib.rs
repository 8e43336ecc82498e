//! keystone-instance - Process coordination for Keystone
//!
//! - [`SingleInstanceCoordinator`]: become the owning instance or forward
//!   launch paths to it
//! - [`RestartCoordinator`]: hand-over lock between an exiting instance and
//!   its replacement

pub mod protocol;
pub mod restart;
pub mod single_instance;

pub use protocol::{Ack, LaunchMessage};
pub use restart::{
    RestartCoordinator, RestartLock, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, RESTART_LOCK_FLAG,
};
pub use single_instance::{
    Claim, ForwardCallback, InstanceOwner, SingleInstanceCoordinator, DEFAULT_FORWARD_TIMEOUT,
};
