use super::vheap::VIRTUAL_HEAP;
use super::{AddrOps, MemoryError, VirtualAddress, FRAME_PAGE_SIZE};
use crate::println;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, null_mut};
use spin::Mutex;

pub const MALLOC_ALIGNMENT: usize = 16;

/// How much the heap grows at a time: 16 pages, plus whatever the request
/// overflows that by.
pub const MALLOC_CHUNK: usize = 1 << 16;

/// Header size rounded up so every data area starts 16-byte aligned.
const ALIGNED_HEADER_SIZE: usize = (size_of::<BlockHeader>() + MALLOC_ALIGNMENT - 1) & !(MALLOC_ALIGNMENT - 1);

#[derive(Clone, Copy, PartialEq)]
enum BlockStatus {
    Free,
    Allocated,
}

/// Control block preceding every heap allocation. Headers form a
/// doubly-linked list sorted by address; the data area starts
/// `ALIGNED_HEADER_SIZE` past the header.
#[repr(C)]
struct BlockHeader {
    next: *mut BlockHeader,
    prev: *mut BlockHeader,
    size: usize,
    status: BlockStatus,
    data_start: VirtualAddress,
}

struct KernelHeapInner {
    bottom: VirtualAddress,
    top: VirtualAddress,
    head: *mut BlockHeader,
}

// the headers live inside heap memory this allocator owns
unsafe impl Send for KernelHeapInner {}

/// The byte-granular kernel heap: an intrusive free list over the
/// page-granular virtual heap. Not interrupt safe; ISRs must not allocate.
pub struct KernelHeap(Mutex<KernelHeapInner>);

#[global_allocator]
pub static KERNEL_HEAP: KernelHeap = KernelHeap(Mutex::new(KernelHeapInner {
    bottom: 0,
    top: 0,
    head: null_mut(),
}));

fn align16(size: usize) -> usize {
    size.align_up(MALLOC_ALIGNMENT)
}

impl KernelHeap {
    /// Allocates at least `size` bytes, 16-byte aligned. Null on exhaustion.
    pub fn kmalloc(&self, size: usize) -> *mut u8 {
        let inner = &mut *self.0.lock();
        match unsafe { inner.kmalloc(size) } {
            Ok(addr) => addr as *mut u8,
            Err(err) => {
                println!("kmalloc error: {:?}", err);
                null_mut()
            }
        }
    }

    /// Allocates zeroed space for `count` members of `size` bytes each. The
    /// `count * size` product is not checked for overflow.
    pub fn kcalloc(&self, count: usize, size: usize) -> *mut u8 {
        let total = count * size;
        let ptr = self.kmalloc(total);
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, total) };
        }

        ptr
    }

    /// Frees an allocation. `ptr` may point anywhere inside the block's data
    /// area; null is a no-op, anything not matching a block is reported and
    /// ignored.
    pub fn kfree(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let inner = &mut *self.0.lock();
        unsafe { inner.kfree(ptr as VirtualAddress) };
    }

    /// Resizes an allocation, moving it if it cannot grow in place. A `size`
    /// of 0 frees; a null `ptr` allocates.
    pub fn krealloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if size == 0 {
            self.kfree(ptr);
            return null_mut();
        }

        if ptr.is_null() {
            return self.kmalloc(size);
        }

        let inner = &mut *self.0.lock();
        match unsafe { inner.krealloc(ptr as VirtualAddress, size) } {
            Ok(addr) => addr as *mut u8,
            Err(err) => {
                println!("krealloc error: {:?}", err);
                null_mut()
            }
        }
    }
}

impl KernelHeapInner {
    /// Lazily claims the first chunk from the virtual heap and plants the
    /// initial all-free block in it.
    fn ensure_init(&mut self) -> Result<(), MemoryError> {
        if self.top != 0 {
            return Ok(());
        }

        let bottom = VIRTUAL_HEAP.alloc_pages(MALLOC_CHUNK / FRAME_PAGE_SIZE)?;
        self.bottom = bottom;
        self.top = bottom + MALLOC_CHUNK;

        let head = bottom.align_up(MALLOC_ALIGNMENT) as *mut BlockHeader;
        unsafe {
            (*head).next = null_mut();
            (*head).prev = null_mut();
            (*head).status = BlockStatus::Free;
            (*head).data_start = head as VirtualAddress + ALIGNED_HEADER_SIZE;
            (*head).size = self.top - (*head).data_start;
        }

        self.head = head;
        Ok(())
    }

    /// First-fit search; when nothing fits, the heap break moves up by the
    /// shortfall plus one chunk and the tail block grows into the new space.
    ///
    /// # Safety
    ///
    /// The heap must be initialized.
    unsafe fn get_block(&mut self, size: usize) -> Result<*mut BlockHeader, MemoryError> {
        unsafe {
            let mut current = self.head;
            loop {
                if (*current).status == BlockStatus::Free && (*current).size >= size {
                    return Ok(current);
                }

                if (*current).next.is_null() {
                    break;
                }
                current = (*current).next;
            }

            // no free block is large enough, move the break
            let tail = current;
            let spare = if (*tail).status == BlockStatus::Free { (*tail).size } else { 0 };

            let pages = (size - spare + MALLOC_CHUNK).align_up(FRAME_PAGE_SIZE) / FRAME_PAGE_SIZE;
            VIRTUAL_HEAP.alloc_pages(pages)?;

            let old_top = self.top;
            self.top += pages * FRAME_PAGE_SIZE;

            if (*tail).status == BlockStatus::Free {
                (*tail).size += pages * FRAME_PAGE_SIZE;
                return Ok(tail);
            }

            // the tail is allocated; the new space becomes a fresh free block
            let header = old_top as *mut BlockHeader;
            (*header).next = null_mut();
            (*header).prev = tail;
            (*header).status = BlockStatus::Free;
            (*header).data_start = header as VirtualAddress + ALIGNED_HEADER_SIZE;
            (*header).size = self.top - (*header).data_start;
            (*tail).next = header;

            Ok(header)
        }
    }

    /// Finds the block whose data area contains `ptr`.
    ///
    /// # Safety
    ///
    /// The heap must be initialized.
    unsafe fn find_header(&mut self, ptr: VirtualAddress) -> Option<*mut BlockHeader> {
        unsafe {
            let mut current = self.head;
            while !current.is_null() {
                if ptr >= (*current).data_start && ptr <= (*current).data_start + (*current).size {
                    return Some(current);
                }

                current = (*current).next;
            }
        }

        None
    }

    /// Carves a free block out of `block`'s surplus beyond `aligned_size`.
    ///
    /// # Safety
    ///
    /// `block` must be a live header with
    /// `size >= aligned_size + ALIGNED_HEADER_SIZE + MALLOC_ALIGNMENT`.
    unsafe fn split_block(&mut self, block: *mut BlockHeader, aligned_size: usize) {
        unsafe {
            let new_header = (block as VirtualAddress + ALIGNED_HEADER_SIZE + aligned_size) as *mut BlockHeader;

            (*new_header).next = (*block).next;
            (*new_header).prev = block;
            if !(*new_header).next.is_null() {
                (*(*new_header).next).prev = new_header;
            }
            (*block).next = new_header;

            (*new_header).status = BlockStatus::Free;
            (*new_header).data_start = new_header as VirtualAddress + ALIGNED_HEADER_SIZE;
            (*new_header).size = (*block).size - aligned_size - ALIGNED_HEADER_SIZE;

            (*block).size = aligned_size;
        }
    }

    /// Absorbs `block`'s next neighbour if it is free.
    ///
    /// # Safety
    ///
    /// `block` must be a live header.
    unsafe fn merge_forwards(&mut self, block: *mut BlockHeader) {
        unsafe {
            let next = (*block).next;
            if next.is_null() || (*next).status != BlockStatus::Free {
                return;
            }

            (*block).size += (*next).size + ALIGNED_HEADER_SIZE;
            (*block).next = (*next).next;
            if !(*block).next.is_null() {
                (*(*block).next).prev = block;
            }
        }
    }

    unsafe fn kmalloc(&mut self, size: usize) -> Result<VirtualAddress, MemoryError> {
        self.ensure_init()?;

        unsafe {
            let current = self.get_block(size)?;
            (*current).status = BlockStatus::Allocated;

            // split when the surplus fits a header and at least one
            // alignment block of data
            if (*current).size - size >= ALIGNED_HEADER_SIZE + MALLOC_ALIGNMENT {
                self.split_block(current, align16(size));
            }

            Ok((*current).data_start)
        }
    }

    unsafe fn kfree(&mut self, ptr: VirtualAddress) {
        // nothing was ever allocated, so nothing can be freed
        if self.top == 0 {
            return;
        }

        unsafe {
            let Some(current) = self.find_header(ptr) else {
                println!("kfree of {:#x} matches no allocated block, ignoring", ptr);
                return;
            };

            if (*current).status == BlockStatus::Free {
                println!("kfree of {:#x} hit an already free block, ignoring", ptr);
                return;
            }

            (*current).status = BlockStatus::Free;

            // combine forwards, then backwards
            self.merge_forwards(current);
            let prev = (*current).prev;
            if !prev.is_null() && (*prev).status == BlockStatus::Free {
                self.merge_forwards(prev);
            }
        }
    }

    unsafe fn krealloc(&mut self, ptr: VirtualAddress, size: usize) -> Result<VirtualAddress, MemoryError> {
        self.ensure_init()?;

        unsafe {
            let Some(current) = self.find_header(ptr) else {
                println!("krealloc of {:#x} matches no allocated block, ignoring", ptr);
                return Err(MemoryError::HeapInvalidPointer);
            };

            if (*current).status == BlockStatus::Free {
                println!("krealloc of {:#x} hit a free block, ignoring", ptr);
                return Err(MemoryError::HeapInvalidPointer);
            }

            if size == (*current).size {
                return Ok((*current).data_start);
            }

            if size < (*current).size {
                // shrink in place; release the surplus if it is worth a header
                if (*current).size - align16(size) >= ALIGNED_HEADER_SIZE + MALLOC_ALIGNMENT {
                    self.split_block(current, align16(size));
                    self.merge_forwards((*current).next);
                }

                return Ok((*current).data_start);
            }

            // grow: absorb the next block when that is enough
            let next = (*current).next;
            if !next.is_null()
                && (*next).status == BlockStatus::Free
                && (*current).size + ALIGNED_HEADER_SIZE + (*next).size >= size
            {
                self.merge_forwards(current);

                if (*current).size - align16(size) >= ALIGNED_HEADER_SIZE + MALLOC_ALIGNMENT {
                    self.split_block(current, align16(size));
                }

                return Ok((*current).data_start);
            }

            // no room in place; allocate elsewhere and carry the data over
            let old_size = (*current).size;
            let new_addr = self.kmalloc(size)?;
            ptr::copy_nonoverlapping(
                (*current).data_start as *const u8,
                new_addr as *mut u8,
                old_size,
            );
            self.kfree((*current).data_start);

            Ok(new_addr)
        }
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let inner = &mut *self.0.lock();

        if layout.align() <= MALLOC_ALIGNMENT {
            return match unsafe { inner.kmalloc(layout.size()) } {
                Ok(addr) => addr as *mut u8,
                Err(_) => null_mut(),
            };
        }

        // over-aligned layouts: over-allocate and hand out an aligned
        // interior pointer; kfree accepts interior pointers by design
        match unsafe { inner.kmalloc(layout.size() + layout.align()) } {
            Ok(addr) => addr.align_up(layout.align()) as *mut u8,
            Err(_) => null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let inner = &mut *self.0.lock();
        unsafe { inner.kfree(ptr as VirtualAddress) };
    }
}
