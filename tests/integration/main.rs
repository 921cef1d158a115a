//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a slice of the monitoring
//! core end to end against the mock ports.

mod dose_tests;
mod mock_ports;
mod pipeline_tests;
mod protocol_tests;
