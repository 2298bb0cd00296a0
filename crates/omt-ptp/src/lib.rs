//! Clock discipline for the OMT media transport.
//!
//! An IEEE 1588-2008 (PTPv2) follower listens on the standard multicast
//! group, runs the delay-request/response exchange against the grandmaster
//! and feeds measured drift into a PI servo. The accumulated correction
//! disciplines a [`TimeSource`] that sender clocks stamp frames from.
//!
//! This crate only ever follows; it never participates in best-master
//! election or answers delay requests.

pub mod clock;
pub mod error;
pub mod follower;
pub mod message;
pub mod servo;
pub mod time;

pub use clock::ClockAdapter;
pub use error::{PtpError, Result};
pub use follower::{PtpConfig, PtpFollower};
pub use message::{MessageType, PortIdentity, PtpBody, PtpHeader, PtpMessage, PtpTimestamp};
pub use servo::{PiServo, ServoState};
pub use time::{LocalTimeSource, PtpTimeSource, TimeSource};
