//! Atmel AVR32 UC3 DFU bootloader commands.
//!
//! Based on Atmel doc32131. The UC3 bootloader speaks standard DFU on the wire
//! but wraps every action in a vendor command frame: memory units and pages are
//! selected first, then a window within the page is programmed or read.
//!
//! ```no_run
//! # use uc3_dfu::*;
//! # fn run<T: Transport>(transport: T) -> Result<(), TransferError<T::Error>> {
//! let cancel = Cancellable::new();
//! let mut p = Programmer::new(transport, Options::default());
//!
//! let image = Element::new(0x8000_0000, vec![0u8; 4096]);
//! p.download_element(&image, TransferFlags::VERIFY, &cancel)?;
//! p.attach(true, &cancel)?;
//! # Ok(())
//! # }
//! ```

use core::ops::BitOr;

#[macro_use]
extern crate log;

#[cfg(feature = "structopt")]
extern crate structopt;

pub mod error;
pub mod planner;
pub mod protocol;
pub mod select;
pub mod transport;
pub mod window;

#[cfg(feature = "usb")]
pub mod usb;

pub use crate::error::{Annotated, Phase, SelectPhase, TransferError};
pub use crate::planner::{plan, Chunk, PageGroup, Plan, PlanError};
pub use crate::protocol::{CommandFrame, MemoryPage, MemoryUnit};
pub use crate::select::{MemorySelector, TransferContext};
pub use crate::transport::{Cancellable, Direction, Transport};
pub use crate::window::{AddressRange, AddressWindow};

use crate::protocol::{
    build_attach, build_mass_erase, build_program_start, build_read_memory, MAX_CONTROL_LENGTH, PAGE_SIZE,
};

/// Parse a decimal or `0x` prefixed hexadecimal value
pub fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Memory unit holding the elements being transferred
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "flash"))]
    pub memory_unit: MemoryUnit,

    /// Address of the start of the memory unit in the target address map
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0x80000000", parse(try_from_str = parse_u32)))]
    pub address_offset: u32,

    /// Maximum payload per DFU transfer
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1024", parse(try_from_str = parse_u32)))]
    pub transfer_size: u32,

    /// Timeout for USB control transfers
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "5000"))]
    pub timeout_ms: u32,

    /// Minimum period between DFU status polls
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            memory_unit: MemoryUnit::Flash,
            address_offset: protocol::AVR32_ADDR_OFFSET,
            transfer_size: protocol::MAX_TRANSFER_SIZE,
            timeout_ms: 5000,
            poll_delay_ms: 1,
        }
    }
}

/// Options for [`DeviceCommandSet::download_element`]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct TransferFlags {
    /// Read back and compare each window after writing
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub verify: bool,

    /// Do not erase the device before writing
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_mass_erase: bool,
}

impl TransferFlags {
    pub const NONE: Self = Self {
        verify: false,
        no_mass_erase: false,
    };
    pub const VERIFY: Self = Self {
        verify: true,
        no_mass_erase: false,
    };
    pub const NO_MASS_ERASE: Self = Self {
        verify: false,
        no_mass_erase: true,
    };

    /// Whether every flag set in `other` is also set here
    pub fn contains(self, other: Self) -> bool {
        (!other.verify || self.verify) && (!other.no_mass_erase || self.no_mass_erase)
    }
}

impl BitOr for TransferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            verify: self.verify || rhs.verify,
            no_mass_erase: self.no_mass_erase || rhs.no_mass_erase,
        }
    }
}

/// Contiguous block of firmware data at an absolute address
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Element {
    pub address: u32,
    pub data: Vec<u8>,
    pub expected_size: usize,
    pub maximum_size: usize,
}

impl Element {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            address,
            data,
            expected_size: len,
            maximum_size: len,
        }
    }
}

/// Operations a device family exposes to the firmware update engine
pub trait DeviceCommandSet {
    type Error;

    /// Erase all device memory
    fn mass_erase(&mut self, cancel: &Cancellable) -> Result<(), Self::Error>;

    /// Leave the bootloader and start the application
    fn attach(&mut self, reset: bool, cancel: &Cancellable) -> Result<(), Self::Error>;

    /// Read `expected_size` bytes starting at `address`
    fn upload_element(
        &mut self,
        address: u32,
        expected_size: usize,
        maximum_size: usize,
        cancel: &Cancellable,
    ) -> Result<Element, Self::Error>;

    /// Write an element to the device
    fn download_element(
        &mut self,
        element: &Element,
        flags: TransferFlags,
        cancel: &Cancellable,
    ) -> Result<(), Self::Error>;
}

type ProgressFn = Box<dyn FnMut(usize, usize) + Send>;

/// UC3 command set driver over a [`Transport`]
pub struct Programmer<T> {
    transport: T,
    options: Options,
    progress: Option<ProgressFn>,
}

impl<T> Programmer<T>
where
    T: Transport,
{
    /// Create a new programmer instance
    pub fn new(transport: T, options: Options) -> Self {
        Self {
            transport,
            options,
            progress: None,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Register a callback invoked with `(done, total)` bytes after each chunk
    pub fn set_progress<F>(&mut self, f: F)
    where
        F: FnMut(usize, usize) + Send + 'static,
    {
        self.progress = Some(Box::new(f));
    }

    /// Plan a transfer of `len` bytes at absolute `address`
    pub fn plan(&self, address: u32, len: usize) -> Result<Plan, TransferError<T::Error>> {
        let offset = address
            .checked_sub(self.options.address_offset)
            .ok_or(TransferError::AddressOutOfRange { address })?;

        // The absolute end must also fit the 32-bit address map
        if len > 0 && AddressRange::from_len(address, len).is_none() {
            return Err(TransferError::AddressOutOfRange { address });
        }

        let max_chunk = self.transport.max_transfer_size().min(MAX_CONTROL_LENGTH);
        Ok(plan(offset, len, PAGE_SIZE, max_chunk)?)
    }

    fn check(&self, cancel: &Cancellable) -> Result<(), TransferError<T::Error>> {
        if cancel.is_cancelled() {
            debug!("Cancelled");
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }

    fn report(&mut self, done: usize, total: usize) {
        if let Some(p) = self.progress.as_mut() {
            p(done, total);
        }
    }

    fn read_window(&mut self, chunk: &Chunk, block: u32) -> Result<Vec<u8>, TransferError<T::Error>> {
        let frame = build_read_memory(chunk.window);
        self.transport.send_command(0, frame.as_bytes()).map_err(|e| {
            TransferError::transport(Phase::ReadMemory, e, format!("cannot read memory {}", chunk.window))
        })?;

        let mut buff = vec![0u8; chunk.len()];
        let n = self
            .transport
            .transfer_chunk(block, Direction::Upload(&mut buff))
            .map_err(|e| TransferError::transport(Phase::Upload, e, format!("cannot upload {}", chunk.window)))?;

        trace!("Read {} bytes from {} on page {}", n, chunk.window, chunk.page);

        if n < chunk.len() {
            return Err(TransferError::ShortRead {
                page: chunk.page,
                window: chunk.window,
                expected: chunk.len(),
                actual: n,
                context: Vec::new(),
            });
        }

        Ok(buff)
    }

    fn upload(
        &mut self,
        address: u32,
        expected_size: usize,
        maximum_size: usize,
        cancel: &Cancellable,
    ) -> Result<Element, TransferError<T::Error>> {
        self.check(cancel)?;

        if expected_size > maximum_size {
            return Err(TransferError::SizeExceeded {
                size: expected_size,
                maximum: maximum_size,
                context: Vec::new(),
            });
        }

        let plan = self.plan(address, expected_size)?;
        let mut ctx = TransferContext::open(&mut self.transport, self.options.memory_unit)?;
        let mut data = Vec::with_capacity(expected_size);

        for (i, chunk) in plan.chunks().enumerate() {
            self.check(cancel)?;

            if ctx.transferred + chunk.len() > maximum_size {
                return Err(TransferError::SizeExceeded {
                    size: ctx.transferred + chunk.len(),
                    maximum: maximum_size,
                    context: vec![format!("cannot read {} on page {}", chunk.window, chunk.page)],
                });
            }

            ctx.ensure_page(&mut self.transport, chunk.page)?;
            let buff = self.read_window(chunk, i as u32)?;
            data.extend_from_slice(&buff);

            ctx.transferred += buff.len();
            self.report(ctx.transferred, plan.len());
        }

        Ok(Element {
            address,
            data,
            expected_size,
            maximum_size,
        })
    }

    fn download(
        &mut self,
        element: &Element,
        flags: TransferFlags,
        cancel: &Cancellable,
    ) -> Result<(), TransferError<T::Error>> {
        self.check(cancel)?;

        let len = element.data.len();
        if element.maximum_size != 0 && len > element.maximum_size {
            return Err(TransferError::SizeExceeded {
                size: len,
                maximum: element.maximum_size,
                context: Vec::new(),
            });
        }

        let plan = self.plan(element.address, len)?;

        if !flags.contains(TransferFlags::NO_MASS_ERASE) {
            self.erase(cancel)?;
        }

        let mut ctx = TransferContext::open(&mut self.transport, self.options.memory_unit)?;

        for (i, chunk) in plan.chunks().enumerate() {
            self.check(cancel)?;

            ctx.ensure_page(&mut self.transport, chunk.page)?;

            let frame = build_program_start(chunk.window);
            self.transport.send_command(0, frame.as_bytes()).map_err(|e| {
                TransferError::transport(Phase::ProgramStart, e, format!("cannot program start {}", chunk.window))
            })?;

            let data = &element.data[chunk.offset..chunk.offset + chunk.len()];
            let n = self
                .transport
                .transfer_chunk(i as u32, Direction::Download(data))
                .map_err(|e| TransferError::transport(Phase::Download, e, format!("cannot download {}", chunk.window)))?;

            trace!("Wrote {} bytes to {} on page {}", n, chunk.window, chunk.page);

            if n < data.len() {
                return Err(TransferError::ShortWrite {
                    page: chunk.page,
                    window: chunk.window,
                    expected: data.len(),
                    actual: n,
                    context: Vec::new(),
                });
            }

            if flags.contains(TransferFlags::VERIFY) {
                let readback = self.read_window(chunk, i as u32)?;
                if let Some(pos) = data.iter().zip(readback.iter()).position(|(a, b)| a != b) {
                    let address = element.address + (chunk.offset + pos) as u32;
                    warn!("Verify failed at 0x{:08x}", address);
                    return Err(TransferError::VerifyMismatch { address });
                }
            }

            ctx.transferred += n;
            self.report(ctx.transferred, plan.len());
        }

        Ok(())
    }

    fn erase(&mut self, cancel: &Cancellable) -> Result<(), TransferError<T::Error>> {
        self.check(cancel)?;

        debug!("Mass erasing device");

        let frame = build_mass_erase();
        self.transport
            .send_command(0, frame.as_bytes())
            .map_err(|e| TransferError::transport(Phase::Erase, e, "cannot mass-erase"))
    }
}

impl<T> DeviceCommandSet for Programmer<T>
where
    T: Transport,
{
    type Error = TransferError<T::Error>;

    fn mass_erase(&mut self, cancel: &Cancellable) -> Result<(), Self::Error> {
        self.erase(cancel)
    }

    fn attach(&mut self, reset: bool, cancel: &Cancellable) -> Result<(), Self::Error> {
        self.check(cancel)?;

        debug!("Starting application (reset: {})", reset);

        let frame = build_attach(reset);
        match self.transport.send_command(0, frame.as_bytes()) {
            Ok(()) => Ok(()),
            Err(e) if self.transport.is_disconnect(&e) => {
                debug!("Device disconnected on attach: {:?}", e);
                Ok(())
            }
            Err(e) => Err(TransferError::transport(Phase::Attach, e, "cannot attach")),
        }
    }

    fn upload_element(
        &mut self,
        address: u32,
        expected_size: usize,
        maximum_size: usize,
        cancel: &Cancellable,
    ) -> Result<Element, Self::Error> {
        info!(
            "Uploading {} bytes from 0x{:08x} ({})",
            expected_size, address, self.options.memory_unit
        );

        self.upload(address, expected_size, maximum_size, cancel)
            .map_err(|e| e.context(format!("cannot upload element 0x{:08x}", address)))
    }

    fn download_element(
        &mut self,
        element: &Element,
        flags: TransferFlags,
        cancel: &Cancellable,
    ) -> Result<(), Self::Error> {
        info!(
            "Downloading {} bytes to 0x{:08x} ({})",
            element.data.len(),
            element.address,
            self.options.memory_unit
        );

        self.download(element, flags, cancel)
            .map_err(|e| e.context(format!("cannot download element 0x{:08x}", element.address)))
    }
}
