//! Address ranges used for program and read commands.

use core::fmt;

/// Inclusive byte range within one memory page
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AddressWindow {
    start: u16,
    end: u16,
}

impl AddressWindow {
    /// Create a window, `None` if `start > end`
    pub fn new(start: u16, end: u16) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of bytes covered, never zero
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Split into consecutive windows of at most `max` bytes
    pub fn split(self, max: u32) -> Split {
        Split {
            next: Some(self.start as u32),
            end: self.end as u32,
            max: max.max(1),
        }
    }
}

impl fmt::Display for AddressWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x} -> 0x{:04x}", self.start, self.end)
    }
}

/// Iterator returned by [`AddressWindow::split`]
pub struct Split {
    next: Option<u32>,
    end: u32,
    max: u32,
}

impl Iterator for Split {
    type Item = AddressWindow;

    fn next(&mut self) -> Option<AddressWindow> {
        let start = self.next?;
        let end = start.saturating_add(self.max - 1).min(self.end);

        self.next = if end < self.end { Some(end + 1) } else { None };

        Some(AddressWindow {
            start: start as u16,
            end: end as u16,
        })
    }
}

/// Inclusive byte range relative to the start of a memory unit, may span pages
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
}

impl AddressRange {
    /// Range of `len` bytes from `start`, `None` when empty or past the 32-bit space
    pub fn from_len(start: u32, len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let end = (start as u64) + (len as u64) - 1;
        if end > u32::MAX as u64 {
            return None;
        }
        Some(Self {
            start,
            end: end as u32,
        })
    }

    pub fn len(&self) -> u64 {
        (self.end as u64) - (self.start as u64) + 1
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x} -> 0x{:08x}", self.start, self.end)
    }
}
