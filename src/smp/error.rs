//! Error types for the SMP layer.

/// Failures while decoding the MP configuration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// The table (or an entry inside it) runs past the declared length.
    Truncated { offset: usize, needed: usize, len: usize },
    /// Entry type byte outside 0..=4.
    UnknownEntry { offset: usize, kind: u8 },
    /// More processors than the store can hold.
    TooManyCpus,
    /// More I/O APICs than the store can hold.
    TooManyIoApics,
    /// More buses than the store can hold.
    TooManyBuses,
    /// Record storage could not be grown.
    OutOfMemory,
}

impl TableError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TableError::Truncated { .. } => "table truncated",
            TableError::UnknownEntry { .. } => "unknown entry type",
            TableError::TooManyCpus => "too many processors",
            TableError::TooManyIoApics => "too many I/O APICs",
            TableError::TooManyBuses => "too many buses",
            TableError::OutOfMemory => "out of memory",
        }
    }
}

impl From<super::raw::RawAccessError> for TableError {
    fn from(err: super::raw::RawAccessError) -> Self {
        match err {
            super::raw::RawAccessError::OutOfBounds { offset, size, len } => TableError::Truncated {
                offset,
                needed: size,
                len,
            },
            super::raw::RawAccessError::Overflow => TableError::Truncated {
                offset: usize::MAX,
                needed: 0,
                len: 0,
            },
        }
    }
}

/// Failures while locating the MP structures in physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryError {
    /// No floating pointer in either scan window.
    NotFound,
    /// The pointer names a table address that cannot be read.
    Unreadable(u64),
    /// The pointer carries no table address (default configurations).
    NoTable,
    Table(TableError),
}

impl DiscoveryError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DiscoveryError::NotFound => "MP floating pointer not found",
            DiscoveryError::Unreadable(_) => "MP table unreadable",
            DiscoveryError::NoTable => "default configurations are not supported",
            DiscoveryError::Table(err) => err.as_str(),
        }
    }
}

impl From<TableError> for DiscoveryError {
    fn from(err: TableError) -> Self {
        DiscoveryError::Table(err)
    }
}

/// Cross-core call failures reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XcallError {
    /// Target id is not below the processor count.
    InvalidTarget(u32),
    /// Target has not created its request queue yet.
    NoQueue(u32),
    /// Target already has a request outstanding.
    QueueBusy(u32),
    /// Handler found its queue empty.
    NoRequest(u32),
}

impl XcallError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            XcallError::InvalidTarget(_) => "invalid target processor",
            XcallError::NoQueue(_) => "target has no request queue",
            XcallError::QueueBusy(_) => "target queue busy",
            XcallError::NoRequest(_) => "no pending request",
        }
    }
}

/// Failures during a secondary's setup phase. Each one stops that core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApSetupError {
    LocalApic,
    Scheduler,
    Stack,
}

impl ApSetupError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ApSetupError::LocalApic => "could not initialize local APIC",
            ApSetupError::Scheduler => "could not set up scheduler",
            ApSetupError::Stack => "could not allocate runtime stack",
        }
    }
}

/// Problems preparing the shared wake-up state before any core is woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupError {
    TrampolineTooLarge(usize),
}

impl BringupError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BringupError::TrampolineTooLarge(_) => "trampoline does not fit its page",
        }
    }
}
