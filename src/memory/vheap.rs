use super::paging::entry::EntryFlags;
use super::{paging, AddrOps, MemoryError, VirtualAddress, FRAME_PAGE_SIZE};
use crate::println;
use spin::Mutex;

/// Bottom of the kernel heap: the first byte mapped through PML4 slot 1,
/// safely clear of the identity-mapped slot 0.
pub const KERNEL_HEAP_BASE: VirtualAddress = 0x0000_0080_0000_0000;

struct VirtualHeapInner {
    brk: VirtualAddress,
}

/// The page-granular kernel heap: a single break pointer over demand-paged
/// virtual memory, in the spirit of a userspace sbrk.
pub struct VirtualHeap(Mutex<VirtualHeapInner>);

pub static VIRTUAL_HEAP: VirtualHeap = VirtualHeap(Mutex::new(VirtualHeapInner {
    brk: KERNEL_HEAP_BASE,
}));

impl VirtualHeap {
    pub fn brk(&self) -> VirtualAddress {
        self.0.lock().brk
    }

    /// Reserves `count` pages at the break and returns their base. The pages
    /// are only marked for demand allocation; no frame is spent until the
    /// first access faults one in. Pages that still hold a reservation from
    /// an earlier, truncated allocation are reused as they are.
    pub fn alloc_pages(&self, count: usize) -> Result<VirtualAddress, MemoryError> {
        let inner = &mut *self.0.lock();
        let start = inner.brk;

        for page in 0..count {
            let entry = paging::resolve(start + page * FRAME_PAGE_SIZE)?;
            if entry.flags().contains(EntryFlags::PRESENT) || entry.is_demand() {
                continue;
            }

            entry.set_unused();
            entry.set_flags(EntryFlags::WRITABLE | EntryFlags::NO_CACHE | EntryFlags::DEMAND);
        }

        inner.brk = start + count * FRAME_PAGE_SIZE;
        Ok(start)
    }

    /// Truncates the break down to the page containing `addr`. The pages
    /// above keep their mappings and reservations; nothing goes back to the
    /// frame allocator.
    pub fn free(&self, addr: VirtualAddress) {
        let inner = &mut *self.0.lock();

        if addr > inner.brk {
            println!("vheap free of {:#x} is above the break ({:#x}), ignoring", addr, inner.brk);
            return;
        }

        if addr < KERNEL_HEAP_BASE {
            println!("vheap free of {:#x} is below the heap, ignoring", addr);
            return;
        }

        inner.brk = addr.align_down(FRAME_PAGE_SIZE);
    }
}
