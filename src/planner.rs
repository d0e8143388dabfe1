//! Splits an element into page-bounded windows sized for the transport.

use core::fmt::Debug;

use crate::error::TransferError;
use crate::protocol::MemoryPage;
use crate::window::{AddressRange, AddressWindow};

/// Reasons a range cannot be planned
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PlanError {
    EmptyRange,
    InvalidGeometry { page_size: u32, max_chunk: u32 },
    AddressOutOfRange { address: u32 },
}

impl<E: Debug> From<PlanError> for TransferError<E> {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::EmptyRange => TransferError::EmptyRange,
            PlanError::InvalidGeometry {
                page_size,
                max_chunk,
            } => TransferError::InvalidGeometry {
                page_size,
                max_chunk,
            },
            PlanError::AddressOutOfRange { address } => TransferError::AddressOutOfRange { address },
        }
    }
}

/// One transfer: a window on a page, and where its bytes sit in the element
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Chunk {
    pub page: MemoryPage,
    pub window: AddressWindow,
    pub offset: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Unit-relative address of the first byte
    pub fn address(&self, page_size: u32) -> u32 {
        self.page.0 as u32 * page_size + self.window.start() as u32
    }
}

/// Chunks sharing a page, in ascending address order
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PageGroup {
    pub page: MemoryPage,
    pub chunks: Vec<Chunk>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Plan {
    pub range: AddressRange,
    pub page_size: u32,
    pub groups: Vec<PageGroup>,
}

impl Plan {
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.groups.iter().flat_map(|g| g.chunks.iter())
    }

    /// Total number of bytes covered
    pub fn len(&self) -> usize {
        self.range.len() as usize
    }
}

/// Plan the transfer of `len` bytes starting at unit-relative address `start`.
///
/// Windows never cross a page, never exceed `max_chunk` bytes, and together
/// cover the range exactly once in ascending order.
pub fn plan(start: u32, len: usize, page_size: u32, max_chunk: u32) -> Result<Plan, PlanError> {
    if len == 0 {
        return Err(PlanError::EmptyRange);
    }
    if page_size == 0 || page_size > 0x10000 || max_chunk == 0 {
        return Err(PlanError::InvalidGeometry {
            page_size,
            max_chunk,
        });
    }

    let range = AddressRange::from_len(start, len).ok_or(PlanError::AddressOutOfRange { address: start })?;

    if range.end / page_size > u16::MAX as u32 {
        return Err(PlanError::AddressOutOfRange { address: range.end });
    }

    let mut groups = Vec::new();
    let mut addr = range.start;
    let mut offset = 0usize;

    loop {
        let page = addr / page_size;
        let base = page * page_size;
        let last = (base as u64 + page_size as u64 - 1).min(range.end as u64) as u32;

        let window = AddressWindow::new((addr - base) as u16, (last - base) as u16)
            .ok_or(PlanError::AddressOutOfRange { address: addr })?;

        let page = MemoryPage(page as u16);
        let mut chunks = Vec::new();
        for w in window.split(max_chunk) {
            chunks.push(Chunk {
                page,
                window: w,
                offset,
            });
            offset += w.len();
        }
        groups.push(PageGroup { page, chunks });

        if last == range.end {
            break;
        }
        addr = last + 1;
    }

    Ok(Plan {
        range,
        page_size,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_partition(start: u32, len: usize, page_size: u32, max_chunk: u32) {
        let p = plan(start, len, page_size, max_chunk).unwrap();

        let mut next = start as u64;
        let mut offset = 0;
        let mut last_page = None;

        for g in &p.groups {
            assert!(Some(g.page) > last_page, "pages ascend");
            last_page = Some(g.page);
            assert!(!g.chunks.is_empty());

            for c in &g.chunks {
                assert_eq!(c.page, g.page);
                assert!(c.len() as u32 <= max_chunk);
                assert!((c.window.end() as u32) < page_size);
                assert_eq!(c.address(page_size) as u64, next, "no gap or overlap");
                assert_eq!(c.offset, offset);
                next += c.len() as u64;
                offset += c.len();
            }
        }

        assert_eq!(next, start as u64 + len as u64);
        assert_eq!(offset, len);
        assert_eq!(p.len(), len);
    }

    #[test]
    fn partitions_exactly() {
        for &page_size in &[1u32, 3, 16, 64, 0x100] {
            for &max_chunk in &[1u32, 2, 7, 16, 1000] {
                for start in 0..40u32 {
                    for len in 1..70usize {
                        check_partition(start, len, page_size, max_chunk);
                    }
                }
            }
        }
    }

    #[test]
    fn full_size_pages() {
        check_partition(0x0000, 0x30000, 0x10000, 0x400);
        check_partition(0xFFF0, 0x20, 0x10000, 0x400);
        check_partition(0xFFFF_0000, 0x10000, 0x10000, 0x10000);
    }

    #[test]
    fn single_page() {
        let p = plan(0x0100, 0x101, 0x10000, 0x400).unwrap();
        assert_eq!(p.groups.len(), 1);
        assert_eq!(p.groups[0].page, MemoryPage(0));
        assert_eq!(p.groups[0].chunks.len(), 1);
        assert_eq!(p.groups[0].chunks[0].window, AddressWindow::new(0x0100, 0x0200).unwrap());

        let p = plan(0x0100, 0x101, 0x10000, 0x80).unwrap();
        assert_eq!(p.groups.len(), 1);
        assert_eq!(p.groups[0].chunks.len(), 3);
    }

    #[test]
    fn one_group_per_page() {
        let p = plan(0x0_FF00, 0x2_0200, 0x10000, 0x400).unwrap();
        let pages: Vec<_> = p.groups.iter().map(|g| g.page).collect();
        assert_eq!(pages, vec![MemoryPage(0), MemoryPage(1), MemoryPage(2), MemoryPage(3)]);

        let first = &p.groups[0].chunks;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].window, AddressWindow::new(0xFF00, 0xFFFF).unwrap());

        let last = p.groups[3].chunks.last().unwrap();
        assert_eq!(last.window.end(), 0x00FF);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(plan(0, 0, 0x10000, 0x400), Err(PlanError::EmptyRange));
        assert_eq!(
            plan(0, 1, 0, 0x400),
            Err(PlanError::InvalidGeometry {
                page_size: 0,
                max_chunk: 0x400
            })
        );
        assert!(matches!(plan(0, 1, 0x20000, 0x400), Err(PlanError::InvalidGeometry { .. })));
        assert!(matches!(plan(0, 1, 0x100, 0), Err(PlanError::InvalidGeometry { .. })));
        assert!(matches!(plan(u32::MAX, 2, 0x100, 0x40), Err(PlanError::AddressOutOfRange { .. })));
        // 0x100 byte pages only reach 0x00FF_FFFF with a 16-bit page number
        assert_eq!(
            plan(0x0100_0000, 1, 0x100, 0x40),
            Err(PlanError::AddressOutOfRange { address: 0x0100_0000 })
        );

        let e: TransferError<()> = PlanError::EmptyRange.into();
        assert_eq!(e, TransferError::EmptyRange);
    }
}
