use super::Frame;
use crate::interrupts::InterruptGuard;
use crate::memory::{AddrOps, MemoryError, PhysicalAddress, FRAME_PAGE_SIZE};
use crate::multiboot2::elf_symbols::ElfSymbols;
use crate::multiboot2::memory_map::{MemoryMap, MemoryMapEntryType};
use crate::multiboot2::MbBootInfo;
use crate::{assert_called_once, println};
use core::ptr::null_mut;
use spin::Mutex;

/// An intentionally non-canonical address; it can never name a real frame so
/// it doubles as the empty-slot marker inside the chunk lists.
pub const FRAME_EMPTY: PhysicalAddress = 0xFF00_0000_0000_0000;

pub const FRAME_LIST_CAPACITY: usize = 510;

const MAX_RAM_REGIONS: usize = 5;

/// One node of a frame-address list, sized to fill a frame exactly so the
/// allocator can grow its own metadata one frame at a time.
#[repr(C)]
struct FrameListChunk {
    next: *mut FrameListChunk,
    count: u64,
    addrs: [PhysicalAddress; FRAME_LIST_CAPACITY],
}

const _: () = assert!(size_of::<FrameListChunk>() == FRAME_PAGE_SIZE);

// all-zero so the initial chunks cost nothing in the binary; init() marks
// every slot empty before the lists are first used
const ZEROED_CHUNK: FrameListChunk = FrameListChunk {
    next: null_mut(),
    count: 0,
    addrs: [0; FRAME_LIST_CAPACITY],
};

/// A usable RAM range reported by Multiboot2. `cursor` is the next physical
/// address allocation will attempt inside this region.
#[derive(Clone, Copy)]
struct RamRegion {
    base: PhysicalAddress,
    size: usize,
    cursor: PhysicalAddress,
}

const EMPTY_REGION: RamRegion = RamRegion {
    base: 0,
    size: 0,
    cursor: 0,
};

#[derive(Clone, Copy, PartialEq)]
enum FrameList {
    Used,
    Freed,
}

struct ListFrameAllocatorInner {
    regions: [RamRegion; MAX_RAM_REGIONS],
    region_count: usize,

    // the initial chunks live right here in bss; every further chunk is a
    // frame handed out by this very allocator
    used_head: FrameListChunk,
    freed_head: FrameListChunk,

    // set while a metadata chunk is being allocated so the nested allocation
    // does not try to grow the list again
    growing: bool,

    initialized: bool,
}

// the chunk pointers only ever reference frames this allocator owns
unsafe impl Send for ListFrameAllocatorInner {}

pub struct ListFrameAllocator(Mutex<ListFrameAllocatorInner>);

pub static FRAME_ALLOCATOR: ListFrameAllocator = ListFrameAllocator(Mutex::new(ListFrameAllocatorInner {
    regions: [EMPTY_REGION; MAX_RAM_REGIONS],
    region_count: 0,
    used_head: ZEROED_CHUNK,
    freed_head: ZEROED_CHUNK,
    growing: false,
    initialized: false,
}));

impl ListFrameAllocator {
    /// Reads the Multiboot2 reservations (the info struct itself plus every
    /// loaded ELF section) into the Used list and records the usable RAM
    /// regions.
    ///
    /// # Safety
    ///
    /// May only be called once, with a valid `mb_info`.
    pub unsafe fn init(&self, mb_info: &MbBootInfo) -> Result<(), MemoryError> {
        assert_called_once!("Cannot call ListFrameAllocator::init() more than once");

        let _guard = InterruptGuard::cli();
        let inner = &mut *self.0.lock();

        // mark all entries in the used and freed lists as empty
        for i in 0..FRAME_LIST_CAPACITY {
            inner.used_head.addrs[i] = FRAME_EMPTY;
            inner.freed_head.addrs[i] = FRAME_EMPTY;
        }

        // the multiboot2 info lives in available RAM; reserve it whole
        println!("Found multiboot table at: {:#x} ({} bytes)", mb_info.addr(), mb_info.size());
        let mut page = mb_info.addr().align_down(FRAME_PAGE_SIZE);
        while page < mb_info.addr() + mb_info.size() as usize {
            unsafe { inner.list_add(FrameList::Used, page) };
            page += FRAME_PAGE_SIZE;
        }

        // reserve every page covered by an elf section before any RAM region
        // can be consumed; this keeps the kernel image in place
        let elf_symbols = mb_info
            .get_tag::<ElfSymbols>()
            .ok_or(MemoryError::ElfSymbolsMbTagDoesNotExist)?;

        for section in elf_symbols.sections().map_err(MemoryError::ElfSectionsErr)? {
            if section.size == 0 {
                continue;
            }

            let mut page = (section.addr as PhysicalAddress).align_down(FRAME_PAGE_SIZE);
            while page < section.addr as PhysicalAddress + section.size as usize {
                unsafe { inner.list_add(FrameList::Used, page) };
                page += FRAME_PAGE_SIZE;
            }
        }

        // record the usable RAM regions, trimmed to frame boundaries
        let mem_map = mb_info
            .get_tag::<MemoryMap>()
            .ok_or(MemoryError::MemoryMapMbTagDoesNotExist)?;

        for entry in mem_map.entries().map_err(MemoryError::MemoryMapErr)? {
            if entry.entry_type() != MemoryMapEntryType::AvailableRAM {
                continue;
            }

            let base = (entry.base_addr as PhysicalAddress).align_up(FRAME_PAGE_SIZE);
            let end = ((entry.base_addr + entry.length) as PhysicalAddress).align_down(FRAME_PAGE_SIZE);
            if end <= base {
                continue;
            }

            if inner.region_count >= MAX_RAM_REGIONS {
                println!("Too many RAM regions, ignoring the rest");
                break;
            }

            println!("RAM region at {:#x}, {} bytes", base, end - base);
            inner.regions[inner.region_count] = RamRegion {
                base,
                size: end - base,
                cursor: base,
            };
            inner.region_count += 1;
        }

        inner.initialized = true;
        Ok(())
    }

    /// Hands out a free frame, reusing previously freed frames first.
    pub fn allocate(&self) -> Result<Frame, MemoryError> {
        // the page-fault handler allocates too, so the lists may never be
        // touched with interrupts enabled
        let _guard = InterruptGuard::cli();
        let inner = &mut *self.0.lock();
        assert!(inner.initialized);

        inner.alloc().map(Frame::from_phy_addr)
    }

    /// Returns a frame to the allocator. The address is rounded down to its
    /// frame boundary; freeing an address that was never handed out is
    /// reported and ignored.
    pub fn deallocate(&self, addr: PhysicalAddress) {
        let _guard = InterruptGuard::cli();
        let inner = &mut *self.0.lock();
        assert!(inner.initialized);

        inner.free(addr);
    }
}

impl ListFrameAllocatorInner {
    fn head_ptr(&mut self, list: FrameList) -> *mut FrameListChunk {
        match list {
            FrameList::Used => &raw mut self.used_head,
            FrameList::Freed => &raw mut self.freed_head,
        }
    }

    /// Walks a chunk list looking for `addr`.
    ///
    /// # Safety
    ///
    /// `head` must point to a valid chunk list.
    unsafe fn list_contains(head: *mut FrameListChunk, addr: PhysicalAddress) -> bool {
        let mut chunk = head;
        while !chunk.is_null() {
            unsafe {
                for i in 0..FRAME_LIST_CAPACITY {
                    if (*chunk).addrs[i] == addr {
                        return true;
                    }
                }

                chunk = (*chunk).next;
            }
        }

        false
    }

    /// Removes `addr` from a chunk list; false if it was not present.
    ///
    /// # Safety
    ///
    /// `head` must point to a valid chunk list.
    unsafe fn list_remove(head: *mut FrameListChunk, addr: PhysicalAddress) -> bool {
        let mut chunk = head;
        while !chunk.is_null() {
            unsafe {
                for i in 0..FRAME_LIST_CAPACITY {
                    if (*chunk).addrs[i] == addr {
                        (*chunk).addrs[i] = FRAME_EMPTY;
                        (*chunk).count -= 1;
                        return true;
                    }
                }

                chunk = (*chunk).next;
            }
        }

        false
    }

    /// Records `addr` in a chunk list, growing the list with a freshly
    /// allocated chunk when the last one is about to fill up.
    ///
    /// # Safety
    ///
    /// The caller must hold the allocator lock (`&mut self` enforces it) and
    /// `addr` must be frame aligned.
    unsafe fn list_add(&mut self, list: FrameList, addr: PhysicalAddress) {
        let head = self.head_ptr(list);

        // never store a duplicate
        if unsafe { Self::list_contains(head, addr) } {
            println!("Frame {:#x} already in table", addr);
            return;
        }

        unsafe {
            // find the first chunk with space
            let mut chunk = head;
            while !(*chunk).next.is_null() && (*chunk).count as usize == FRAME_LIST_CAPACITY {
                chunk = (*chunk).next;
            }

            for i in 0..FRAME_LIST_CAPACITY {
                if (*chunk).addrs[i] != FRAME_EMPTY {
                    continue;
                }

                (*chunk).addrs[i] = addr;
                (*chunk).count += 1;

                // grow before the last chunk fills up: the growth itself
                // inserts into this list and needs a few spare slots
                if (*chunk).count as usize + 5 >= FRAME_LIST_CAPACITY && (*chunk).next.is_null() && !self.growing {
                    self.grow_list(chunk);
                }

                return;
            }

            // full chunk claiming to have space; fix the count and bail
            println!("Frame list capacity off by one!! FATAL");
            (*chunk).count = FRAME_LIST_CAPACITY as u64;
        }
    }

    /// Appends a fresh, self-allocated chunk behind `chunk`.
    ///
    /// # Safety
    ///
    /// `chunk` must be the last chunk of one of this allocator's lists.
    unsafe fn grow_list(&mut self, chunk: *mut FrameListChunk) {
        self.growing = true;
        let grown = self.alloc();
        self.growing = false;

        let addr = match grown {
            Ok(addr) => addr,
            Err(_) => {
                println!("Out of frames while growing a frame list");
                return;
            }
        };

        unsafe {
            let fresh = addr as *mut FrameListChunk;
            (*fresh).next = null_mut();
            (*fresh).count = 0;
            for i in 0..FRAME_LIST_CAPACITY {
                (*fresh).addrs[i] = FRAME_EMPTY;
            }

            (*chunk).next = fresh;
        }
    }

    fn alloc(&mut self) -> Result<PhysicalAddress, MemoryError> {
        // check for previously freed frames first
        let mut chunk = self.head_ptr(FrameList::Freed);
        while !chunk.is_null() {
            unsafe {
                // don't bother searching an empty chunk
                if (*chunk).count > 0 {
                    for i in 0..FRAME_LIST_CAPACITY {
                        if (*chunk).addrs[i] == FRAME_EMPTY {
                            continue;
                        }

                        let addr = (*chunk).addrs[i];
                        (*chunk).addrs[i] = FRAME_EMPTY;
                        (*chunk).count -= 1;

                        self.list_add(FrameList::Used, addr);
                        return Ok(addr);
                    }
                }

                chunk = (*chunk).next;
            }
        }

        // no freed frames; take the next untouched frame from the RAM regions
        for i in 0..self.region_count {
            let region = self.regions[i];

            let mut attempt = region.cursor;
            while attempt + FRAME_PAGE_SIZE <= region.base + region.size {
                if unsafe { Self::list_contains(self.head_ptr(FrameList::Used), attempt) } {
                    // reserved by the kernel image or the mb2 info; step over
                    attempt += FRAME_PAGE_SIZE;
                    continue;
                }

                unsafe { self.list_add(FrameList::Used, attempt) };

                // only advance the cursor forward; a nested metadata
                // allocation may already have pushed it further
                let region = &mut self.regions[i];
                if region.cursor < attempt + FRAME_PAGE_SIZE {
                    region.cursor = attempt + FRAME_PAGE_SIZE;
                }

                return Ok(attempt);
            }
        }

        // every region is exhausted; we are out of RAM
        Err(MemoryError::OutOfPhysicalMemory)
    }

    fn free(&mut self, addr: PhysicalAddress) {
        let addr = addr.align_down(FRAME_PAGE_SIZE);

        // only frames that are actually allocated move to the freed list
        if unsafe { Self::list_remove(self.head_ptr(FrameList::Used), addr) } {
            unsafe { self.list_add(FrameList::Freed, addr) };
        } else {
            println!("pf_free() called on unallocated frame {:#x}!", addr);
        }
    }
}
