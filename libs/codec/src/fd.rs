//! Out-of-band file descriptors
//!
//! Descriptors only exist on unix; elsewhere the type is uninhabited so a
//! message can never carry one.

#[cfg(unix)]
pub use std::os::fd::OwnedFd;

#[cfg(not(unix))]
#[derive(Debug)]
pub enum OwnedFd {}
