//! AVR32 UC3 DFU command frames.
//!
//! Based on Atmel doc32131 (AVR32 UC3 USB DFU bootloader).

use core::fmt;
use core::str::FromStr;

use crate::window::AddressWindow;

pub const GROUP_DOWNLOAD: u8 = 0x01;
pub const GROUP_UPLOAD: u8 = 0x03;
pub const GROUP_EXEC: u8 = 0x04;
pub const GROUP_SELECT: u8 = 0x06;

pub const CMD_PROGRAM_START: u8 = 0x01;
pub const CMD_READ_MEMORY: u8 = 0x00;
pub const CMD_ERASE: u8 = 0x00;
pub const CMD_START_APPLI: u8 = 0x03;
pub const CMD_SELECT_MEMORY: u8 = 0x03;

pub const MEMORY_UNIT: u8 = 0x00;
pub const MEMORY_PAGE: u8 = 0x01;

pub const ERASE_EVERYTHING: u8 = 0xFF;
pub const START_APPLI_RESET: u8 = 0x00;
pub const START_APPLI_NO_RESET: u8 = 0x01;

/// Size of a memory page, addresses within a page are 16 bits wide
pub const PAGE_SIZE: u32 = 0x10000;

/// Largest DFU payload the UC3 bootloader accepts in one transfer
pub const MAX_TRANSFER_SIZE: u32 = 0x400;

/// Largest data stage a control transfer can describe in `wLength`
pub const MAX_CONTROL_LENGTH: u32 = 0xFFFF;

/// Base of the UC3 flash in the AVR32 address map
pub const AVR32_ADDR_OFFSET: u32 = 0x8000_0000;

/// Memory units exposed by the bootloader
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemoryUnit {
    Flash = 0x00,
    Eeprom = 0x01,
    Security = 0x02,
    Configuration = 0x03,
    Bootloader = 0x04,
    Signature = 0x05,
    User = 0x06,
}

impl MemoryUnit {
    /// Unit code as sent in the select frame
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Default for MemoryUnit {
    fn default() -> Self {
        MemoryUnit::Flash
    }
}

impl fmt::Display for MemoryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryUnit::Flash => "flash",
            MemoryUnit::Eeprom => "eeprom",
            MemoryUnit::Security => "security",
            MemoryUnit::Configuration => "configuration",
            MemoryUnit::Bootloader => "bootloader",
            MemoryUnit::Signature => "signature",
            MemoryUnit::User => "user",
        };
        f.write_str(s)
    }
}

impl FromStr for MemoryUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flash" => Ok(MemoryUnit::Flash),
            "eeprom" => Ok(MemoryUnit::Eeprom),
            "security" => Ok(MemoryUnit::Security),
            "configuration" | "config" => Ok(MemoryUnit::Configuration),
            "bootloader" => Ok(MemoryUnit::Bootloader),
            "signature" => Ok(MemoryUnit::Signature),
            "user" => Ok(MemoryUnit::User),
            _ => Err(format!("unknown memory unit '{}'", s)),
        }
    }
}

/// Page within the selected memory unit
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct MemoryPage(pub u16);

impl fmt::Display for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// A built command, immutable once created
#[derive(Clone, PartialEq, Eq)]
pub enum CommandFrame {
    Exec([u8; 3]),
    SelectUnit([u8; 4]),
    SelectPage([u8; 5]),
    Window([u8; 6]),
}

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CommandFrame::Exec(b) => b,
            CommandFrame::SelectUnit(b) => b,
            CommandFrame::SelectPage(b) => b,
            CommandFrame::Window(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x?}", self.as_bytes())
    }
}

/// Erase every memory unit
pub fn build_mass_erase() -> CommandFrame {
    CommandFrame::Exec([GROUP_EXEC, CMD_ERASE, ERASE_EVERYTHING])
}

/// Leave the bootloader and start the application
pub fn build_attach(reset: bool) -> CommandFrame {
    let arg = if reset {
        START_APPLI_RESET
    } else {
        START_APPLI_NO_RESET
    };
    CommandFrame::Exec([GROUP_EXEC, CMD_START_APPLI, arg])
}

pub fn build_select_memory_unit(unit: MemoryUnit) -> CommandFrame {
    CommandFrame::SelectUnit([GROUP_SELECT, CMD_SELECT_MEMORY, MEMORY_UNIT, unit.code()])
}

pub fn build_select_memory_page(page: MemoryPage) -> CommandFrame {
    let p = page.0.to_le_bytes();
    CommandFrame::SelectPage([GROUP_SELECT, CMD_SELECT_MEMORY, MEMORY_PAGE, p[0], p[1]])
}

pub fn build_program_start(window: AddressWindow) -> CommandFrame {
    window_frame(GROUP_DOWNLOAD, CMD_PROGRAM_START, window)
}

pub fn build_read_memory(window: AddressWindow) -> CommandFrame {
    window_frame(GROUP_UPLOAD, CMD_READ_MEMORY, window)
}

fn window_frame(group: u8, command: u8, window: AddressWindow) -> CommandFrame {
    let s = window.start().to_le_bytes();
    let e = window.end().to_le_bytes();
    CommandFrame::Window([group, command, s[0], s[1], e[0], e[1]])
}
