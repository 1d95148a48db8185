// https://refspecs.linuxfoundation.org/elf/elf.pdf
use super::tag_trait::MbTag;
use super::{MbTagHeader, TagType};
use bitflags::bitflags;

#[repr(C)]
#[derive(ptr_meta::Pointee)]
pub struct ElfSymbols {
    header: MbTagHeader,
    num: u16,
    entry_size: u16,
    shndx: u16,
    reserved: u16,
    padding: u32,

    /*
     * The section headers start 20 bytes into the tag, so their u64 fields
     * sit 4 bytes off their natural alignment. Keeping the storage as raw
     * bytes and copying each header out with read_unaligned sidesteps that.
     */
    section_headers: [u8],
}

/// One Elf64 section header, copied out of the tag payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ElfSectionHeader {
    pub name_index: u32,
    pub section_type: u32,
    flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entry_size: u64,
}

bitflags! {
    #[derive(Debug, Clone, Copy)]
    pub struct ElfSectionFlags: u64 {
        const ELF_SECTION_WRITABLE   = 0x1; // section contains data that is writable
        const ELF_SECTION_ALLOCATED  = 0x2; // section is in memory during execution
        const ELF_SECTION_EXECUTABLE = 0x4; // section contains executable code
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElfSectionError {
    /// Section headers are not the 64-byte Elf64 layout.
    Invalid32BitSectionHeaders,
}

impl ElfSymbols {
    pub fn num(&self) -> usize {
        self.num as usize
    }

    pub fn sections(&self) -> Result<ElfSectionIter, ElfSectionError> {
        if self.entry_size as usize != size_of::<ElfSectionHeader>() {
            return Err(ElfSectionError::Invalid32BitSectionHeaders);
        }

        Ok(ElfSectionIter {
            data: &self.section_headers,
            index: 0,
            count: self.num as usize,
        })
    }
}

impl ElfSectionHeader {
    pub fn flags(&self) -> ElfSectionFlags {
        ElfSectionFlags::from_bits_truncate(self.flags)
    }
}

impl MbTag for ElfSymbols {
    const TAG_TYPE: TagType = TagType::ElfSymbols;

    fn dst_size(base_tag: &MbTagHeader) -> Self::Metadata {
        base_tag.size as usize - size_of::<MbTagHeader>() - size_of::<u16>() * 4 - size_of::<u32>()
    }
}

#[derive(Clone, Copy)]
pub struct ElfSectionIter<'a> {
    data: &'a [u8],
    index: usize,
    count: usize,
}

impl Iterator for ElfSectionIter<'_> {
    type Item = ElfSectionHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }

        let offset = self.index * size_of::<ElfSectionHeader>();
        if offset + size_of::<ElfSectionHeader>() > self.data.len() {
            // the tag claims more sections than it carries
            return None;
        }

        self.index += 1;
        // Safety: the range was just bounds checked; read_unaligned copes
        // with the 4-byte misalignment
        Some(unsafe { (self.data.as_ptr().add(offset) as *const ElfSectionHeader).read_unaligned() })
    }
}
