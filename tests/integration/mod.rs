//! Workspace integration tests.
//!
//! `scenario_lifecycle` and `interrupts` drive the real process runner
//! against a fake `terraform` script. `sftp_stack` provisions the actual SFTP
//! module and is ignored unless asked for explicitly.

#[cfg(unix)]
mod interrupts;
#[cfg(unix)]
mod scenario_lifecycle;
mod sftp_stack;
