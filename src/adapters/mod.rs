//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements         | Connects to                 |
//! |---------------|--------------------|-----------------------------|
//! | `config_file` | ConfigPort         | JSON settings file          |
//! | `console`     | NotificationPort   | log (`caregiver` target)    |
//! |               | AlarmPort          | terminal bell               |
//! |               | ActuatorPort       | motor line protocol         |
//! | `log_sink`    | EventSink          | `log` facade                |
//! | `record_log`  | EventSink          | JSON-lines reading records  |
//! | `replay`      | SampleSource       | recorded CSV datasets       |

pub mod config_file;
pub mod console;
pub mod log_sink;
pub mod record_log;
pub mod replay;
