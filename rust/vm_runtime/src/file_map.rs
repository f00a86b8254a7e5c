//! File map: placement of files in the shared 30-bit address space.
//!
//! Port data, definition files and user data each own a region of the address
//! space with its own alignment boundary.  Files without an address are placed
//! after the last resident file of their region; files with an explicit address
//! are admitted only if they overlap nothing.  Resident files are kept sorted by
//! address with the remote flag masked off.

use std::cell::Cell;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;

pub const ADDRESS_MASK_INTERNAL: u32 = 0x3FFF_FFFF;
pub const REMOTE_ADDRESS_BIT: u32 = 0x8000_0000;
pub const CMD_START_ADDRESS: u32 = 0x3FFF_FC00;
/// Marks a file whose address the allocator chooses.
pub const INVALID_ADDRESS: u32 = 0xFFFF_FFFF;

pub const PORT_DATA_START: u32 = 0x0;
pub const PORT_DATA_BOUNDARY: u32 = 0x400;
pub const DEFINITION_START: u32 = 0x400_0000;
pub const DEFINITION_BOUNDARY: u32 = 0x10_0000;
pub const USER_DATA_START: u32 = 0x2000_0000;
pub const USER_DATA_END: u32 = CMD_START_ADDRESS;
pub const USER_DATA_BOUNDARY: u32 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FileType {
    #[default]
    Unknown,
    InData,
    OutData,
    Definition,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DigestType {
    #[default]
    None,
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// May carry [`REMOTE_ADDRESS_BIT`].
    pub address: u32,
    pub length: u32,
    pub name: String,
    #[serde(default)]
    pub digest_type: DigestType,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, length: u32) -> Self {
        Self {
            address: INVALID_ADDRESS,
            length,
            name: name.into(),
            digest_type: DigestType::None,
        }
    }

    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    pub fn address_without_flags(&self) -> u32 {
        self.address & ADDRESS_MASK_INTERNAL
    }

    pub fn is_unassigned(&self) -> bool {
        self.address == INVALID_ADDRESS
    }

    pub fn is_remote(&self) -> bool {
        !self.is_unassigned() && self.address & REMOTE_ADDRESS_BIT != 0
    }

    fn start(&self) -> u64 {
        u64::from(self.address_without_flags())
    }

    fn end(&self) -> u64 {
        self.start() + u64::from(self.length)
    }

    fn contains(&self, address: u32) -> bool {
        let address = u64::from(address);
        address >= self.start() && address < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub info: FileInfo,
    #[serde(default)]
    pub file_type: FileType,
}

impl File {
    pub fn new(info: FileInfo, file_type: FileType) -> Self {
        Self { info, file_type }
    }
}

/// Opaque handle to a file resident in a [`FileMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(u64);

/// Half-open address range `[start, end)` with its placement alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRegion {
    pub start: u32,
    pub end: u32,
    pub boundary: u32,
}

impl AddressRegion {
    pub const fn new(start: u32, end: u32, boundary: u32) -> Self {
        Self {
            start,
            end,
            boundary,
        }
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end
    }

    /// Round `address` up to the region boundary.
    pub fn align_up(&self, address: u64) -> u64 {
        let mask = u64::from(self.boundary) - 1;
        (address + mask) & !mask
    }

    fn validate(&self, name: &'static str) -> Result<(), FileMapError> {
        if self.boundary == 0 || !self.boundary.is_power_of_two() {
            return Err(FileMapError::InvalidLayout {
                region: name,
                reason: "boundary must be a non-zero power of two",
            });
        }
        if self.start >= self.end {
            return Err(FileMapError::InvalidLayout {
                region: name,
                reason: "region is empty",
            });
        }
        if self.end > CMD_START_ADDRESS {
            return Err(FileMapError::InvalidLayout {
                region: name,
                reason: "region overlaps the command area",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLayout {
    pub port_data: AddressRegion,
    pub definition: AddressRegion,
    pub user_data: AddressRegion,
}

impl Default for AddressLayout {
    fn default() -> Self {
        Self {
            port_data: AddressRegion::new(PORT_DATA_START, DEFINITION_START, PORT_DATA_BOUNDARY),
            definition: AddressRegion::new(DEFINITION_START, USER_DATA_START, DEFINITION_BOUNDARY),
            user_data: AddressRegion::new(USER_DATA_START, USER_DATA_END, USER_DATA_BOUNDARY),
        }
    }
}

impl AddressLayout {
    pub fn validate(&self) -> Result<(), FileMapError> {
        self.port_data.validate("port_data")?;
        self.definition.validate("definition")?;
        self.user_data.validate("user_data")
    }

    /// Region files of `file_type` are auto-placed in.
    pub fn region_for(&self, file_type: FileType) -> Option<AddressRegion> {
        match file_type {
            FileType::InData | FileType::OutData => Some(self.port_data),
            FileType::Definition => Some(self.definition),
            FileType::Custom => Some(self.user_data),
            FileType::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileMapError {
    #[error("file '{0}' has unknown type and no address")]
    UnknownFileType(String),
    #[error("no room left in region {start:#x}..{end:#x}")]
    OutOfMemory { start: u32, end: u32 },
    #[error("address {address:#x} overlaps a resident file")]
    AddressInUse { address: u32 },
    #[error("file at {address:#x} with length {length} overlaps the next resident file")]
    FileTooLarge { address: u32, length: u32 },
    #[error("invalid {region} region: {reason}")]
    InvalidLayout {
        region: &'static str,
        reason: &'static str,
    },
}

impl FileMapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FileMapError::UnknownFileType(_) | FileMapError::InvalidLayout { .. } => {
                ErrorKind::InvalidArgument
            }
            FileMapError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            FileMapError::AddressInUse { .. } => ErrorKind::AddressInUse,
            FileMapError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
        }
    }
}

#[derive(Debug)]
struct Entry {
    id: FileId,
    file: File,
}

/// Ordered set of resident files with a single-entry lookup cache.
#[derive(Debug, Default)]
pub struct FileMap {
    entries: Vec<Entry>,
    last_found: Cell<Option<usize>>,
    next_id: u64,
    layout: AddressLayout,
}

impl FileMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layout(layout: AddressLayout) -> Result<Self, FileMapError> {
        layout.validate()?;
        Ok(Self {
            layout,
            ..Self::default()
        })
    }

    pub fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    /// Take ownership of `file`, choosing its address when it has none.
    ///
    /// A rejected file is dropped and the map is left unchanged.
    pub fn insert_file(&mut self, mut file: File) -> Result<FileId, FileMapError> {
        if file.info.is_unassigned() {
            let region = self
                .layout
                .region_for(file.file_type)
                .ok_or_else(|| FileMapError::UnknownFileType(file.info.name.clone()))?;
            file.info.address = self.auto_address(region).map_err(|err| {
                debug!(name = %file.info.name, error = %err, "file rejected");
                err
            })?;
        }
        let index = self.admit(&file.info).map_err(|err| {
            debug!(name = %file.info.name, error = %err, "file rejected");
            err
        })?;
        let id = FileId(self.next_id);
        self.next_id += 1;
        debug!(
            name = %file.info.name,
            address = file.info.address,
            length = file.info.length,
            file_type = ?file.file_type,
            "file placed"
        );
        self.entries.insert(index, Entry { id, file });
        self.last_found.set(None);
        Ok(id)
    }

    /// Remove a resident file and hand it back to the caller.
    pub fn remove_file(&mut self, id: FileId) -> Option<File> {
        self.last_found.set(None);
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index).file)
    }

    pub fn exist(&self, id: FileId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn get(&self, id: FileId) -> Option<&File> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.file)
    }

    /// File whose range contains `address`; flag bits are ignored.
    pub fn find_by_address(&self, address: u32) -> Option<&File> {
        let address = address & ADDRESS_MASK_INTERNAL;
        if let Some(index) = self.last_found.get() {
            if let Some(entry) = self.entries.get(index) {
                if entry.file.info.contains(address) {
                    return Some(&entry.file);
                }
            }
        }
        let index = self
            .entries
            .iter()
            .position(|entry| entry.file.info.contains(address))?;
        self.last_found.set(Some(index));
        Some(&self.entries[index].file)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&File> {
        self.entries
            .iter()
            .map(|entry| &entry.file)
            .find(|file| file.info.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resident files in address order.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &File)> {
        self.entries.iter().map(|entry| (entry.id, &entry.file))
    }

    /// Copy of every resident file's info, in address order.
    pub fn file_infos(&self) -> Vec<FileInfo> {
        self.entries
            .iter()
            .map(|entry| entry.file.info.clone())
            .collect()
    }

    /// Move every file out of the map, leaving it empty.
    pub fn take_all(&mut self) -> Vec<(FileId, File)> {
        self.last_found.set(None);
        self.entries
            .drain(..)
            .map(|entry| (entry.id, entry.file))
            .collect()
    }

    fn auto_address(&self, region: AddressRegion) -> Result<u32, FileMapError> {
        let last = self
            .entries
            .iter()
            .map(|entry| &entry.file.info)
            .take_while(|info| info.address_without_flags() < region.end)
            .filter(|info| info.address_without_flags() >= region.start)
            .last();
        let Some(last) = last else {
            return Ok(region.start);
        };
        let placement = region.align_up(last.end());
        if placement >= u64::from(region.end) {
            return Err(FileMapError::OutOfMemory {
                start: region.start,
                end: region.end,
            });
        }
        u32::try_from(placement).map_err(|_| FileMapError::OutOfMemory {
            start: region.start,
            end: region.end,
        })
    }

    /// Index at which `info` keeps the map sorted without overlapping anything.
    fn admit(&self, info: &FileInfo) -> Result<usize, FileMapError> {
        let start = info.start();
        let index = self
            .entries
            .iter()
            .position(|entry| entry.file.info.start() > start)
            .unwrap_or(self.entries.len());
        if let Some(previous) = index.checked_sub(1).and_then(|i| self.entries.get(i)) {
            if previous.file.info.end() > start {
                return Err(FileMapError::AddressInUse {
                    address: info.address,
                });
            }
        }
        if let Some(next) = self.entries.get(index) {
            if info.end() > next.file.info.start() {
                return Err(FileMapError::FileTooLarge {
                    address: info.address,
                    length: info.length,
                });
            }
        }
        Ok(index)
    }
}
