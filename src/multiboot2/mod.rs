// https://www.gnu.org/software/grub/manual/multiboot2/multiboot.html
pub mod elf_symbols;
pub mod memory_map;
pub mod tag_iter;
pub mod tag_trait;

use crate::memory::VirtualAddress;
use tag_iter::MbTagIter;
use tag_trait::MbTag;

pub const MULTIBOOT2_MAGIC: u32 = 0x36D7_6289;

#[repr(C)]
#[derive(Clone)]
struct MbBootInformationHeader {
    total_size: u32,
    reserved: u32,
    // followed by the tags
}

#[repr(C)]
pub struct MbTagHeader {
    tag_type: u32,
    size: u32,
}

/// The tag types this kernel understands. Anything else is carried as
/// `Other` and skipped; casting an arbitrary u32 into a fieldless enum would
/// be undefined behavior, so the header keeps the raw value.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum TagType {
    End,
    MemoryMap,
    ElfSymbols,
    Other(u32),
}

impl MbTagHeader {
    pub(crate) fn tag_type(&self) -> TagType {
        match self.tag_type {
            0 => TagType::End,
            6 => TagType::MemoryMap,
            9 => TagType::ElfSymbols,
            other => TagType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MbError {
    /// The bootloader did not identify itself as Multiboot2 compliant.
    BadMagic(u32),
    NullPointer,
    UnalignedPointer,
}

pub struct MbBootInfo {
    addr: VirtualAddress,
    total_size: u32,
}

impl MbBootInfo {
    /// Validates the boot handoff: the magic the loader left in the entry
    /// register and the pointer to its information structure.
    ///
    /// # Safety
    ///
    /// `mb_boot_info` must point to a complete Multiboot2 information
    /// structure that stays untouched for the lifetime of the returned value.
    pub unsafe fn new(magic: u32, mb_boot_info: *const u8) -> Result<Self, MbError> {
        if magic != MULTIBOOT2_MAGIC {
            return Err(MbError::BadMagic(magic));
        }

        if mb_boot_info.is_null() {
            return Err(MbError::NullPointer);
        }

        // the structure is specified to be 64-bit aligned
        if mb_boot_info.align_offset(size_of::<u64>()) != 0 {
            return Err(MbError::UnalignedPointer);
        }

        let header: &MbBootInformationHeader = unsafe { &*mb_boot_info.cast() };
        Ok(Self {
            addr: mb_boot_info as VirtualAddress,
            total_size: header.total_size,
        })
    }

    pub fn addr(&self) -> VirtualAddress {
        self.addr
    }

    pub fn size(&self) -> u32 {
        self.total_size
    }

    fn tags(&self) -> MbTagIter {
        MbTagIter::new(
            (self.addr + size_of::<MbBootInformationHeader>()) as *const MbTagHeader,
            self.addr + self.total_size as usize,
        )
    }

    pub fn get_tag<T: MbTag + ?Sized>(&self) -> Option<&T> {
        self.tags()
            .find(|tag| tag.tag_type() == T::TAG_TYPE)
            // Safety: the tag stream was validated to come from the bootloader
            .map(|tag| unsafe { MbTag::from_base_tag(tag) })
    }
}
