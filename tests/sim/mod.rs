#![allow(dead_code)]
//! In-memory UC3 bootloader used by the integration tests.

use uc3_dfu::{Cancellable, Direction, Transport};

pub const UNITS: usize = 7;
pub const UNIT_SIZE: usize = 0x40000;
pub const PAGE_SIZE: usize = 0x10000;

#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    Command(Vec<u8>),
    Download(Vec<u8>),
    Upload(usize),
}

#[derive(Clone, PartialEq, Debug)]
pub enum SimError {
    Injected,
    Disconnected,
    Protocol(&'static str),
}

#[derive(Copy, Clone, Debug)]
enum Pending {
    Program { addr: usize, len: usize },
    Read { addr: usize, len: usize },
}

pub struct SimDevice {
    pub memory: Vec<Vec<u8>>,
    pub log: Vec<Event>,
    pub max_transfer: u32,

    /// Fail the nth transport call (0 based)
    pub fail_at: Option<usize>,
    /// Cancel the token once this many downloads have completed
    pub cancel_after_downloads: Option<(usize, Cancellable)>,
    /// Return one byte less than requested on upload
    pub short_reads: bool,
    /// Invert the first byte of every written chunk
    pub corrupt_writes: bool,
    /// Drop off the bus when told to start the application
    pub disconnect_on_attach: bool,

    pub erase_count: usize,
    pub attached: Option<bool>,

    calls: usize,
    downloads: usize,
    unit: Option<usize>,
    page: usize,
    pending: Option<Pending>,
}

impl SimDevice {
    pub fn new(max_transfer: u32) -> Self {
        Self {
            memory: vec![vec![0xFF; UNIT_SIZE]; UNITS],
            log: Vec::new(),
            max_transfer,
            fail_at: None,
            cancel_after_downloads: None,
            short_reads: false,
            corrupt_writes: false,
            disconnect_on_attach: false,
            erase_count: 0,
            attached: None,
            calls: 0,
            downloads: 0,
            unit: None,
            page: 0,
            pending: None,
        }
    }

    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.log
            .iter()
            .filter_map(|e| match e {
                Event::Command(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.log.iter().filter(|e| f(e)).count()
    }

    fn next_call(&mut self) -> Result<(), SimError> {
        let n = self.calls;
        self.calls += 1;
        if self.fail_at == Some(n) {
            return Err(SimError::Injected);
        }
        Ok(())
    }

    fn window(&self, frame: &[u8]) -> Result<(usize, usize), SimError> {
        if self.unit.is_none() {
            return Err(SimError::Protocol("no memory unit selected"));
        }
        let start = u16::from_le_bytes([frame[2], frame[3]]) as usize;
        let end = u16::from_le_bytes([frame[4], frame[5]]) as usize;
        if start > end {
            return Err(SimError::Protocol("inverted window"));
        }
        Ok((self.page * PAGE_SIZE + start, end - start + 1))
    }
}

impl Transport for SimDevice {
    type Error = SimError;

    fn send_command(&mut self, offset: u32, frame: &[u8]) -> Result<(), Self::Error> {
        self.next_call()?;

        if offset != 0 {
            return Err(SimError::Protocol("command with non-zero offset"));
        }

        match frame {
            [0x04, 0x00, 0xFF] => {
                for m in self.memory.iter_mut() {
                    m.iter_mut().for_each(|b| *b = 0xFF);
                }
                self.erase_count += 1;
            }
            [0x04, 0x03, arg] => {
                if self.disconnect_on_attach {
                    return Err(SimError::Disconnected);
                }
                self.attached = Some(*arg == 0x00);
            }
            [0x06, 0x03, 0x00, unit] => {
                let unit = *unit as usize;
                if unit >= UNITS {
                    return Err(SimError::Protocol("unknown memory unit"));
                }
                self.unit = Some(unit);
            }
            [0x06, 0x03, 0x01, lo, hi] => {
                let page = u16::from_le_bytes([*lo, *hi]) as usize;
                if (page + 1) * PAGE_SIZE > UNIT_SIZE {
                    return Err(SimError::Protocol("page out of range"));
                }
                self.page = page;
            }
            [0x01, 0x01, _, _, _, _] => {
                let (addr, len) = self.window(frame)?;
                self.pending = Some(Pending::Program { addr, len });
            }
            [0x03, 0x00, _, _, _, _] => {
                let (addr, len) = self.window(frame)?;
                self.pending = Some(Pending::Read { addr, len });
            }
            _ => return Err(SimError::Protocol("unknown command")),
        }

        self.log.push(Event::Command(frame.to_vec()));
        Ok(())
    }

    fn transfer_chunk(&mut self, _offset: u32, direction: Direction) -> Result<usize, Self::Error> {
        self.next_call()?;

        let unit = self.unit.ok_or(SimError::Protocol("no memory unit selected"))?;

        match (direction, self.pending.take()) {
            (Direction::Download(data), Some(Pending::Program { addr, len })) => {
                if data.len() != len {
                    return Err(SimError::Protocol("chunk does not match program window"));
                }
                let mem = &mut self.memory[unit][addr..addr + len];
                mem.copy_from_slice(data);
                if self.corrupt_writes {
                    mem[0] = !mem[0];
                }

                self.log.push(Event::Download(data.to_vec()));

                self.downloads += 1;
                if let Some((n, c)) = &self.cancel_after_downloads {
                    if self.downloads >= *n {
                        c.cancel();
                    }
                }

                Ok(data.len())
            }
            (Direction::Upload(buff), Some(Pending::Read { addr, len })) => {
                let mut n = len.min(buff.len());
                if self.short_reads {
                    n -= 1;
                }
                buff[..n].copy_from_slice(&self.memory[unit][addr..addr + n]);

                self.log.push(Event::Upload(n));
                Ok(n)
            }
            _ => Err(SimError::Protocol("data phase without matching command")),
        }
    }

    fn max_transfer_size(&self) -> u32 {
        self.max_transfer
    }

    fn is_disconnect(&self, err: &Self::Error) -> bool {
        *err == SimError::Disconnected
    }
}
