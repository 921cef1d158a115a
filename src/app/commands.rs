//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (alert buttons,
//! settings screen, console) that the
//! [`MonitorService`](super::service::MonitorService) interprets and acts
//! upon.  The console spelling is parsed with [`str::parse`]:
//!
//! ```text
//! start | stop | ack <severe|mild|hyper> | dismiss | motor-off | deliver
//! ```

use core::fmt;
use core::str::FromStr;

use crate::fsm::ProtocolKind;

/// Commands that external adapters can send into the monitoring core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    /// Reset all session state and start accepting samples.
    StartSession,

    /// Deactivate every protocol, release the actuator, and reset.
    StopSession,

    /// End one protocol's episode.
    Acknowledge(ProtocolKind),

    /// Acknowledge the highest-priority active protocol.
    DismissAlert,

    /// Stop the drug-delivery motor without ending the severe episode.
    StopActuator,

    /// Run the pump for one configured glucagon dose.
    DeliverDose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(pub String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised command: {:?}", self.0)
    }
}

impl std::error::Error for ParseCommandError {}

impl FromStr for AppCommand {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let cmd = match (words.next(), words.next(), words.next()) {
            (Some("start"), None, _) => Self::StartSession,
            (Some("stop"), None, _) => Self::StopSession,
            (Some("dismiss"), None, _) => Self::DismissAlert,
            (Some("motor-off"), None, _) => Self::StopActuator,
            (Some("deliver"), None, _) => Self::DeliverDose,
            (Some("ack"), Some(kind), None) => Self::Acknowledge(
                kind.parse()
                    .map_err(|_| ParseCommandError(s.trim().to_string()))?,
            ),
            _ => return Err(ParseCommandError(s.trim().to_string())),
        };
        Ok(cmd)
    }
}
