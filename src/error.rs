use core::fmt;

use thiserror::Error;

use crate::protocol::MemoryPage;
use crate::window::AddressWindow;

/// Which half of the memory selection sequence failed
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SelectPhase {
    Unit,
    Page,
}

impl fmt::Display for SelectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectPhase::Unit => f.write_str("unit"),
            SelectPhase::Page => f.write_str("page"),
        }
    }
}

/// Step of an operation that was talking to the transport when it failed
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Phase {
    Erase,
    Attach,
    ProgramStart,
    ReadMemory,
    Download,
    Upload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Erase => "erase",
            Phase::Attach => "attach",
            Phase::ProgramStart => "program start",
            Phase::ReadMemory => "read memory",
            Phase::Download => "download",
            Phase::Upload => "upload",
        };
        f.write_str(s)
    }
}

/// Transport error plus the context added by each layer it passed through.
///
/// Context is stored innermost first and rendered outermost first.
#[derive(Clone, PartialEq, Debug)]
pub struct Annotated<E> {
    pub error: E,
    pub context: Vec<String>,
}

impl<E> Annotated<E> {
    pub fn new(error: E, context: impl Into<String>) -> Self {
        Self {
            error,
            context: vec![context.into()],
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Annotated<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", Prefix(&self.context), self.error)
    }
}

/// Renders a context list outermost first, each entry followed by `": "`
struct Prefix<'a>(&'a [String]);

impl fmt::Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.iter().rev() {
            write!(f, "{}: ", c)?;
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Debug, Error)]
pub enum TransferError<E: fmt::Debug> {
    /// Selecting the memory unit or page failed
    #[error("{cause}")]
    SelectFailed {
        phase: SelectPhase,
        cause: Annotated<E>,
    },

    /// Any other transport failure
    #[error("{cause}")]
    Transport { phase: Phase, cause: Annotated<E> },

    #[error("empty address range")]
    EmptyRange,

    #[error("invalid transfer geometry (page size: {page_size}, chunk size: {max_chunk})")]
    InvalidGeometry { page_size: u32, max_chunk: u32 },

    #[error("address 0x{address:08x} is outside the memory unit")]
    AddressOutOfRange { address: u32 },

    #[error("{}transfer of {size} bytes exceeds maximum of {maximum} bytes", Prefix(.context))]
    SizeExceeded {
        size: usize,
        maximum: usize,
        context: Vec<String>,
    },

    /// The device returned less data than the read window covers
    #[error("{}short read of {window} on page {page} (expected {expected} bytes, got {actual})", Prefix(.context))]
    ShortRead {
        page: MemoryPage,
        window: AddressWindow,
        expected: usize,
        actual: usize,
        context: Vec<String>,
    },

    /// The device accepted less data than the program window covers
    #[error("{}short write of {window} on page {page} (expected {expected} bytes, wrote {actual})", Prefix(.context))]
    ShortWrite {
        page: MemoryPage,
        window: AddressWindow,
        expected: usize,
        actual: usize,
        context: Vec<String>,
    },

    #[error("verify failed at 0x{address:08x}")]
    VerifyMismatch { address: u32 },

    #[error("operation cancelled")]
    Cancelled,
}

impl<E: fmt::Debug> TransferError<E> {
    pub(crate) fn select(phase: SelectPhase, error: E, context: impl Into<String>) -> Self {
        TransferError::SelectFailed {
            phase,
            cause: Annotated::new(error, context),
        }
    }

    pub(crate) fn transport(phase: Phase, error: E, context: impl Into<String>) -> Self {
        TransferError::Transport {
            phase,
            cause: Annotated::new(error, context),
        }
    }

    /// Add an outer context string.
    ///
    /// Errors raised mid-transfer keep it. Errors that describe the whole
    /// call (cancellation, bad addresses, verify mismatches) are returned as is.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        if let Some(c) = self.context_mut() {
            c.push(context.into());
        }
        self
    }

    /// Context strings carried by this error, innermost first
    pub fn context_chain(&self) -> &[String] {
        match self {
            TransferError::SelectFailed { cause, .. } | TransferError::Transport { cause, .. } => {
                cause.context.as_slice()
            }
            TransferError::SizeExceeded { context, .. }
            | TransferError::ShortRead { context, .. }
            | TransferError::ShortWrite { context, .. } => context.as_slice(),
            _ => &[],
        }
    }

    fn context_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            TransferError::SelectFailed { cause, .. } | TransferError::Transport { cause, .. } => {
                Some(&mut cause.context)
            }
            TransferError::SizeExceeded { context, .. }
            | TransferError::ShortRead { context, .. }
            | TransferError::ShortWrite { context, .. } => Some(context),
            _ => None,
        }
    }
}
