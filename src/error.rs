//! Unified error types for the lorabridge crate.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! top-level task loops' error handling uniform.  All variants are `Copy`
//! so they pass through the radio task without allocation.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError, TransportError};
use crate::protocol::CodecError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible protocol operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The radio failed to transmit or receive.
    Transport(TransportError),
    /// A frame could not be sealed or opened.
    Codec(CodecError),
    /// The device registry refused an operation.
    Registry(RegistryError),
    /// A broker command could not be queued.
    Dispatch(DispatchError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// The node has no logical identity yet.
    NotJoined,
    /// Peripheral initialisation failed.
    Init(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Dispatch(e) => write!(f, "dispatch: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::NotJoined => write!(f, "node not joined"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Corrupted => Self::Config("stored config corrupted"),
            ConfigError::ValidationFailed(msg) => Self::Config(msg),
            ConfigError::Storage(s) => Self::Storage(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot holds an active device.
    Full,
    /// Physical id empty, or an identity field too long.
    InvalidIdentity,
    /// No active record for the node id.
    UnknownNode,
    /// The record could not be persisted; the slot was left free.
    Storage(StorageError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "registry full"),
            Self::InvalidIdentity => write!(f, "invalid device identity"),
            Self::UnknownNode => write!(f, "unknown node"),
            Self::Storage(e) => write!(f, "persist failed: {e}"),
        }
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

// ---------------------------------------------------------------------------
// Dispatch errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The device name does not resolve to an active node.
    UnknownDevice,
    /// The outbound queue is full; the command was dropped.
    QueueFull,
    /// The command could not be sealed into one frame.
    Codec(CodecError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDevice => write!(f, "unknown device"),
            Self::QueueFull => write!(f, "outbound queue full"),
            Self::Codec(e) => write!(f, "seal failed: {e}"),
        }
    }
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
