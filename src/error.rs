// Axel '0vercl0k' Souchet - October 16 2026
//! This is the error type used across the codebase.
use std::io;

use thiserror::Error;

use crate::Kva;

pub type Result<R> = std::result::Result<R, WalkerError>;

/// Represent the fundamental reason a single page read can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageReadError {
    /// The address isn't part of the kernel virtual address space; it is
    /// usually a corrupted pointer or one that was never initialized.
    #[error("{kva} isn't a kernel virtual address")]
    NotKvaddr { kva: Kva },
    /// The address looks fine but the page backing it is missing from the
    /// dump.
    #[error("{kva} is missing from the dump")]
    NotInDump { kva: Kva },
    /// Moving `offset` bytes away from the pointer at `kva` goes past either
    /// end of the address space; the pointer is garbage.
    #[error("{kva} wraps around the address space at offset {offset:#x}")]
    AddressWrap { kva: Kva, offset: u64 },
}

impl PageReadError {
    /// The address the read failed at.
    #[must_use]
    pub fn kva(&self) -> Kva {
        match self {
            Self::NotKvaddr { kva } | Self::NotInDump { kva } | Self::AddressWrap { kva, .. } => {
                *kva
            }
        }
    }
}

/// Errors that can happen while walking a dump.
///
/// Memory errors ([`WalkerError::PageRead`] and [`WalkerError::PartialRead`])
/// are considered recoverable: a corrupted pointer in one tree node shouldn't
/// prevent us from walking its siblings. The `try_*` readers turn them into
/// `None`; see [`crate::ignore_non_fatal`]. Everything else means we
/// cannot interpret the dump at all (missing debug info, bad flags, ..) and is
/// bubbled up to the caller.
#[derive(Debug, Error)]
pub enum WalkerError {
    #[error("symbol {0} doesn't exist")]
    UnknownSymbol(String),
    #[error("{struct_name}.{member} isn't described by the debug info")]
    UnknownMember { struct_name: String, member: String },
    #[error("{0} is not supported by this dump")]
    Unsupported(&'static str),
    #[error("overflow: {0}")]
    Overflow(&'static str),
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
    #[error("cannot allocate the register table for {cpus} cpus")]
    Allocation { cpus: usize },
    #[error("io")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Usage(String),
    #[error("partially read {actual_amount} bytes out of {expected_amount} because {reason}")]
    PartialRead {
        expected_amount: usize,
        actual_amount: usize,
        #[source]
        reason: PageReadError,
    },
    #[error("page read: {0}")]
    PageRead(#[from] PageReadError),
}

impl WalkerError {
    /// Is it a memory error, i.e. something a walker can skip over and carry
    /// on?
    #[must_use]
    pub fn is_memory_fault(&self) -> bool {
        matches!(self, Self::PageRead(_) | Self::PartialRead { .. })
    }

    /// The address that couldn't be read, if it is a memory error.
    #[must_use]
    pub fn fault_kva(&self) -> Option<Kva> {
        match self {
            Self::PageRead(reason) | Self::PartialRead { reason, .. } => Some(reason.kva()),
            _ => None,
        }
    }
}

impl From<clap::Error> for WalkerError {
    fn from(value: clap::Error) -> Self {
        Self::Usage(value.to_string())
    }
}
