//! Memory unit and page selection.

use crate::error::{SelectPhase, TransferError};
use crate::protocol::{build_select_memory_page, build_select_memory_unit, MemoryPage, MemoryUnit};
use crate::transport::Transport;

/// Issues the select-unit and select-page frames. Holds no selection state,
/// repeating a selection is always harmless.
pub struct MemorySelector<'a, T> {
    transport: &'a mut T,
}

impl<'a, T: Transport> MemorySelector<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    pub fn select_unit(&mut self, unit: MemoryUnit) -> Result<(), TransferError<T::Error>> {
        debug!("Selecting memory unit {}", unit);

        let frame = build_select_memory_unit(unit);
        self.transport
            .send_command(0, frame.as_bytes())
            .map_err(|e| TransferError::select(SelectPhase::Unit, e, "cannot select memory unit"))
    }

    pub fn select_page(&mut self, page: MemoryPage) -> Result<(), TransferError<T::Error>> {
        debug!("Selecting memory page {}", page);

        let frame = build_select_memory_page(page);
        self.transport
            .send_command(0, frame.as_bytes())
            .map_err(|e| TransferError::select(SelectPhase::Page, e, "cannot select memory page"))
    }
}

/// State for one element transfer, dropped when the call returns
#[derive(Debug)]
pub struct TransferContext {
    pub unit: MemoryUnit,
    pub page: Option<MemoryPage>,
    pub transferred: usize,
}

impl TransferContext {
    /// Select `unit` and start a new context
    pub fn open<T: Transport>(transport: &mut T, unit: MemoryUnit) -> Result<Self, TransferError<T::Error>> {
        MemorySelector::new(transport).select_unit(unit)?;

        Ok(Self {
            unit,
            page: None,
            transferred: 0,
        })
    }

    /// Select `page` unless it is already the current page
    pub fn ensure_page<T: Transport>(
        &mut self,
        transport: &mut T,
        page: MemoryPage,
    ) -> Result<(), TransferError<T::Error>> {
        if self.page == Some(page) {
            trace!("Page {} already selected", page);
            return Ok(());
        }

        // Forget the old page first so a failure forces reselection
        self.page = None;
        MemorySelector::new(transport).select_page(page)?;
        self.page = Some(page);

        Ok(())
    }
}
