use super::tag_trait::MbTag;
use super::{MbTagHeader, TagType};

#[repr(C)]
#[derive(ptr_meta::Pointee)]
pub struct MemoryMap {
    header: MbTagHeader,
    pub entry_size: u32,
    pub entry_version: u32,
    entries: [MemoryMapEntry],
}

#[repr(C)]
pub struct MemoryMapEntry {
    pub base_addr: u64,
    pub length: u64,
    entry_type: u32,
    pub reserved: u32,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum MemoryMapEntryType {
    AvailableRAM,
    ACPIInformation,
    ReservedForHibernation,
    DefectiveRAM,
    Reserved(u32),
}

impl MemoryMapEntry {
    pub fn entry_type(&self) -> MemoryMapEntryType {
        match self.entry_type {
            1 => MemoryMapEntryType::AvailableRAM,
            3 => MemoryMapEntryType::ACPIInformation,
            4 => MemoryMapEntryType::ReservedForHibernation,
            5 => MemoryMapEntryType::DefectiveRAM,
            other => MemoryMapEntryType::Reserved(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryMapError {
    /// The bootloader reported an entry stride this layout cannot parse.
    EntriesInvalidSize,
}

impl MemoryMap {
    pub fn entries(&self) -> Result<&[MemoryMapEntry], MemoryMapError> {
        // make sure the data in the tag matches our entry layout
        if self.entry_size as usize != size_of::<MemoryMapEntry>() {
            return Err(MemoryMapError::EntriesInvalidSize);
        }

        Ok(&self.entries)
    }
}

impl MbTag for MemoryMap {
    const TAG_TYPE: TagType = TagType::MemoryMap;

    fn dst_size(base_tag: &MbTagHeader) -> Self::Metadata {
        let payload = base_tag.size as usize - size_of::<MbTagHeader>() - size_of::<u32>() * 2;
        payload / size_of::<MemoryMapEntry>()
    }
}
