#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(fragaria::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use fragaria::interrupts::{self, gdt};
use fragaria::memory::vheap::VIRTUAL_HEAP;
use fragaria::memory::{self, paging, MemoryError, FRAME_PAGE_SIZE};
use fragaria::multiboot2::MbBootInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    fragaria::test_panic_handler(info);
}

/// # Safety
///
/// The caller (the boot asm) must ensure that `mb_boot_info_addr` points to a
/// valid Multiboot2 struct. This function may only be called once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmain(magic: u32, mb_boot_info_addr: *const u8) -> ! {
    let mb_info = unsafe { MbBootInfo::new(magic, mb_boot_info_addr) }.expect("Invalid multiboot2 data");

    unsafe {
        gdt::init();
        interrupts::init();
        memory::init(&mb_info).expect("Could not initialize the memory subsystem");
    }

    test_main();
    fragaria::hlt();
}

#[test_case]
fn demand_pages_materialize() {
    let addr = VIRTUAL_HEAP.alloc_pages(16).expect("could not reserve pages");

    // the first write to each fresh page takes the page-fault path
    let slots = addr as *mut u64;
    for i in 0..4096u64 {
        unsafe { slots.add(i as usize).write_volatile(i) };
    }

    for i in 0..4096u64 {
        assert_eq!(unsafe { slots.add(i as usize).read_volatile() }, i);
    }
}

#[test_case]
fn identity_map_is_refused() {
    match paging::resolve(0x1000) {
        Err(err) => assert_eq!(err, MemoryError::IdentityMapViolation),
        Ok(_) => panic!("addresses under PML4 slot 0 must not resolve"),
    }
}

#[test_case]
fn non_canonical_addresses_are_refused() {
    match paging::resolve(0x0000_9000_0000_0000) {
        Err(err) => assert_eq!(err, MemoryError::PageInvalidVirtualAddress),
        Ok(_) => panic!("non-canonical addresses must not resolve"),
    }
}

#[test_case]
fn truncated_break_is_reused() {
    let first = VIRTUAL_HEAP.alloc_pages(4).expect("could not reserve pages");
    unsafe { (first as *mut u64).write_volatile(0xDEAD_BEEF) };

    VIRTUAL_HEAP.free(first);
    let again = VIRTUAL_HEAP.alloc_pages(4).expect("could not reserve pages");
    assert_eq!(first, again);

    // truncation keeps the mapping, so the faulted-in frame still backs it
    assert_eq!(unsafe { (again as *const u64).read_volatile() }, 0xDEAD_BEEF);
}

#[test_case]
fn free_above_break_is_ignored() {
    let brk = VIRTUAL_HEAP.brk();
    VIRTUAL_HEAP.free(brk + 123 * FRAME_PAGE_SIZE);
    assert_eq!(VIRTUAL_HEAP.brk(), brk);
}
