use std::thread::sleep;
use std::time::{Duration, Instant};

use rusb::{DeviceHandle, GlobalContext, Recipient, RequestType};
use thiserror::Error;

use crate::protocol::MAX_CONTROL_LENGTH;
use crate::transport::{Direction, Transport};
use crate::{Options, Programmer};

const DFU_DNLOAD: u8 = 0x01;
const DFU_UPLOAD: u8 = 0x02;
const DFU_GETSTATUS: u8 = 0x03;
const DFU_CLRSTATUS: u8 = 0x04;

const DFU_STATUS_OK: u8 = 0x00;
const DFU_STATE_DNBUSY: u8 = 4;
const DFU_STATE_ERROR: u8 = 10;

#[derive(Debug, Error)]
pub enum UsbError {
    #[error("usb: {0}")]
    Usb(#[from] rusb::Error),

    #[error("no device found with id {vid:04x}:{pid:04x}")]
    NotFound { vid: u16, pid: u16 },

    #[error("device reported status 0x{status:02x} (state {state})")]
    Status { status: u8, state: u8 },

    #[error("short status response ({0} bytes)")]
    ShortStatus(usize),

    #[error("device still busy after {waited_ms} ms")]
    Timeout { waited_ms: u32 },
}

/// Response to DFU_GETSTATUS
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct DfuStatus {
    pub status: u8,
    pub poll_timeout_ms: u32,
    pub state: u8,
}

impl DfuStatus {
    pub fn parse(buff: &[u8]) -> Result<Self, UsbError> {
        if buff.len() < 6 {
            return Err(UsbError::ShortStatus(buff.len()));
        }
        Ok(Self {
            status: buff[0],
            poll_timeout_ms: u32::from_le_bytes([buff[1], buff[2], buff[3], 0]),
            state: buff[4],
        })
    }
}

/// DFU class transport over libusb
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    interface: u8,
    options: Options,
}

impl UsbTransport {
    /// Open the first device matching `vid:pid` and claim its DFU interface
    pub fn open(vid: u16, pid: u16, interface: u8, options: Options) -> Result<Self, UsbError> {
        let mut handle = rusb::open_device_with_vid_pid(vid, pid).ok_or(UsbError::NotFound { vid, pid })?;

        // Not supported on every platform
        let _ = handle.set_auto_detach_kernel_driver(true);

        handle.claim_interface(interface)?;

        debug!("Claimed interface {} on {:04x}:{:04x}", interface, vid, pid);

        Ok(Self {
            handle,
            interface,
            options,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.options.timeout_ms as u64)
    }

    fn dnload(&mut self, block: u16, data: &[u8]) -> Result<usize, UsbError> {
        let rt = rusb::request_type(rusb::Direction::Out, RequestType::Class, Recipient::Interface);
        let n = self
            .handle
            .write_control(rt, DFU_DNLOAD, block, self.interface as u16, data, self.timeout())?;

        self.wait_idle()?;

        Ok(n)
    }

    fn upload(&mut self, block: u16, buff: &mut [u8]) -> Result<usize, UsbError> {
        let rt = rusb::request_type(rusb::Direction::In, RequestType::Class, Recipient::Interface);
        let n = self
            .handle
            .read_control(rt, DFU_UPLOAD, block, self.interface as u16, buff, self.timeout())?;
        Ok(n)
    }

    fn get_status(&mut self) -> Result<DfuStatus, UsbError> {
        let rt = rusb::request_type(rusb::Direction::In, RequestType::Class, Recipient::Interface);
        let mut buff = [0u8; 6];
        let n = self
            .handle
            .read_control(rt, DFU_GETSTATUS, 0, self.interface as u16, &mut buff, self.timeout())?;

        DfuStatus::parse(&buff[..n])
    }

    fn clear_status(&mut self) -> Result<(), UsbError> {
        let rt = rusb::request_type(rusb::Direction::Out, RequestType::Class, Recipient::Interface);
        self.handle
            .write_control(rt, DFU_CLRSTATUS, 0, self.interface as u16, &[], self.timeout())?;
        Ok(())
    }

    /// Poll status until the device has finished processing the last download
    fn wait_idle(&mut self) -> Result<(), UsbError> {
        let timeout = self.options.timeout_ms;
        let poll_delay = self.options.poll_delay_ms;

        let res = poll_idle(|| self.get_status(), timeout, poll_delay);
        if let Err(UsbError::Status { .. }) = res {
            self.clear_status()?;
        }
        res
    }
}

/// Poll `get_status` until the device leaves dfuDNBUSY or `timeout_ms` runs out
fn poll_idle<F>(mut get_status: F, timeout_ms: u32, poll_delay_ms: u32) -> Result<(), UsbError>
where
    F: FnMut() -> Result<DfuStatus, UsbError>,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);

    loop {
        let s = get_status()?;

        if s.status != DFU_STATUS_OK || s.state == DFU_STATE_ERROR {
            warn!("Device error status 0x{:02x} in state {}", s.status, s.state);
            return Err(UsbError::Status {
                status: s.status,
                state: s.state,
            });
        }

        if s.state != DFU_STATE_DNBUSY {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            warn!("Device busy for longer than {} ms", timeout_ms);
            return Err(UsbError::Timeout { waited_ms: timeout_ms });
        }

        let wait = Duration::from_millis(s.poll_timeout_ms.max(poll_delay_ms) as u64);
        sleep(wait.min(deadline - now));
    }
}

/// Only a device that has left the bus counts as disconnected.
fn is_bus_drop(err: &UsbError) -> bool {
    matches!(err, UsbError::Usb(rusb::Error::NoDevice))
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}

impl Transport for UsbTransport {
    type Error = UsbError;

    fn send_command(&mut self, offset: u32, frame: &[u8]) -> Result<(), Self::Error> {
        self.dnload(offset as u16, frame)?;
        Ok(())
    }

    fn transfer_chunk(&mut self, offset: u32, direction: Direction) -> Result<usize, Self::Error> {
        match direction {
            Direction::Download(data) => self.dnload(offset as u16, data),
            Direction::Upload(buff) => self.upload(offset as u16, buff),
        }
    }

    fn max_transfer_size(&self) -> u32 {
        self.options.transfer_size.min(MAX_CONTROL_LENGTH)
    }

    fn is_disconnect(&self, err: &Self::Error) -> bool {
        is_bus_drop(err)
    }
}

impl Programmer<UsbTransport> {
    /// Create a new programmer instance on a USB device
    pub fn usb(vid: u16, pid: u16, interface: u8, options: Options) -> Result<Self, UsbError> {
        let transport = UsbTransport::open(vid, pid, interface, options.clone())?;

        Ok(Self::new(transport, options))
    }
}
