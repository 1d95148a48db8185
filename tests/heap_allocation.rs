#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(fragaria::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::panic::PanicInfo;
use core::ptr::{self, null_mut};
use fragaria::interrupts::{self, gdt};
use fragaria::memory::kheap::KERNEL_HEAP;
use fragaria::memory::vheap::VIRTUAL_HEAP;
use fragaria::memory::{self, FRAME_PAGE_SIZE};
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
fn kfree_null_is_a_noop() {
    KERNEL_HEAP.kfree(null_mut());
}

#[test_case]
fn round_trip_reuses_the_block() {
    let a = KERNEL_HEAP.kmalloc(64);
    assert!(!a.is_null());
    KERNEL_HEAP.kfree(a);

    // the freed block must be found again without growing the heap
    let brk = VIRTUAL_HEAP.brk();
    let b = KERNEL_HEAP.kmalloc(64);
    assert_eq!(a, b);
    assert_eq!(VIRTUAL_HEAP.brk(), brk);

    KERNEL_HEAP.kfree(b);
}

#[test_case]
fn neighbours_coalesce_on_free() {
    let a = KERNEL_HEAP.kmalloc(100);
    let b = KERNEL_HEAP.kmalloc(100);
    let c = KERNEL_HEAP.kmalloc(100);
    assert!(!a.is_null() && !b.is_null() && !c.is_null());

    KERNEL_HEAP.kfree(a);
    KERNEL_HEAP.kfree(c);
    KERNEL_HEAP.kfree(b);

    // the three blocks and their two inner headers merged into one span;
    // a request bigger than any single one must land back at `a`
    let big = KERNEL_HEAP.kmalloc(400);
    assert_eq!(big, a);
    KERNEL_HEAP.kfree(big);
}

#[test_case]
fn churn_with_reallocation() {
    let mut ptrs: [*mut u8; 256] = [null_mut(); 256];

    for (i, slot) in ptrs.iter_mut().enumerate() {
        *slot = KERNEL_HEAP.kmalloc(100);
        assert!(!slot.is_null());
        unsafe { ptr::write_bytes(*slot, i as u8, 100) };
    }

    for (i, &ptr) in ptrs.iter().enumerate() {
        for offset in 0..100 {
            assert_eq!(unsafe { ptr.add(offset).read() }, i as u8);
        }
    }

    // free the even slots, then refill them with alternating sizes
    for i in (0..256).step_by(2) {
        KERNEL_HEAP.kfree(ptrs[i]);
    }

    for i in (0..256).step_by(2) {
        let size = if i % 4 == 0 { 10 } else { 200 };
        ptrs[i] = KERNEL_HEAP.kmalloc(size);
        assert!(!ptrs[i].is_null());
        unsafe { ptr::write_bytes(ptrs[i], ((i * 10) % 255) as u8, 10) };
    }

    for i in (0..256).step_by(2) {
        for offset in 0..10 {
            assert_eq!(unsafe { ptrs[i].add(offset).read() }, ((i * 10) % 255) as u8);
        }
    }

    for &ptr in ptrs.iter() {
        KERNEL_HEAP.kfree(ptr);
    }
}

#[test_case]
fn krealloc_shrinks_in_place() {
    let a = KERNEL_HEAP.kmalloc(256);
    assert!(!a.is_null());
    for i in 0..256 {
        unsafe { a.add(i).write(i as u8) };
    }

    let b = KERNEL_HEAP.krealloc(a, 64);
    assert_eq!(a, b);
    for i in 0..64 {
        assert_eq!(unsafe { b.add(i).read() }, i as u8);
    }

    KERNEL_HEAP.kfree(b);
}

#[test_case]
fn krealloc_grows_in_place_when_possible() {
    let a = KERNEL_HEAP.kmalloc(32);
    assert!(!a.is_null());
    unsafe { ptr::write_bytes(a, 0xAB, 32) };

    // the split remainder sits right behind `a`, so the block can widen
    let b = KERNEL_HEAP.krealloc(a, 128);
    assert_eq!(a, b);
    for i in 0..32 {
        assert_eq!(unsafe { b.add(i).read() }, 0xAB);
    }

    KERNEL_HEAP.kfree(b);
}

#[test_case]
fn krealloc_relocates_and_copies() {
    let a = KERNEL_HEAP.kmalloc(32);
    assert!(!a.is_null());
    unsafe { ptr::write_bytes(a, 0x5A, 32) };

    // pin an allocation right behind `a` so it cannot grow in place
    let pin = KERNEL_HEAP.kmalloc(32);
    assert!(!pin.is_null());

    let b = KERNEL_HEAP.krealloc(a, 512);
    assert!(!b.is_null());
    assert_ne!(a, b);
    for i in 0..32 {
        assert_eq!(unsafe { b.add(i).read() }, 0x5A);
    }

    KERNEL_HEAP.kfree(b);
    KERNEL_HEAP.kfree(pin);
}

#[test_case]
fn large_zeroed_allocation() {
    const SLOTS: usize = 131072; // 1 MiB of u64s

    let brk_before = VIRTUAL_HEAP.brk();
    let ptr = KERNEL_HEAP.kcalloc(SLOTS, 8);
    assert!(!ptr.is_null());

    let slots = ptr as *mut u64;
    for i in 0..SLOTS {
        assert_eq!(unsafe { slots.add(i).read() }, 0);
    }

    for i in 0..SLOTS {
        unsafe { slots.add(i).write(i as u64) };
    }
    for i in 0..SLOTS {
        assert_eq!(unsafe { slots.add(i).read() }, i as u64);
    }

    KERNEL_HEAP.kfree(ptr);

    // the virtual heap must have grown by at least 16 pages of backing
    assert!(VIRTUAL_HEAP.brk() >= brk_before + 16 * FRAME_PAGE_SIZE);
}

// the GlobalAlloc surface over the same heap

#[test_case]
fn simple_allocation() {
    let a = Box::new(42);
    let b = String::from("Hello, World!");
    assert_eq!(*a, 42);
    assert_eq!(b, "Hello, World!");
}

#[test_case]
fn large_vector() {
    let n = 1000;
    let mut vec = Vec::new();
    for i in 0..n {
        vec.push(i);
    }

    assert_eq!(vec.len(), n);
    for (i, &item) in vec.iter().enumerate() {
        assert_eq!(item, i);
    }

    // check the sum of the 'n' numbers
    assert_eq!(vec.iter().sum::<usize>(), (n - 1) * n / 2);
}

#[derive(Debug)]
#[repr(align(64))]
struct Aligned64(u64);

#[test_case]
fn bigger_alignment() {
    // alignments above 16 take the over-allocate path of the global allocator
    let a = Box::new(Aligned64(13));
    assert_eq!((&raw const *a as usize) % 64, 0);
    assert_eq!((*a).0, 13);
}

#[test_case]
fn deallocation() {
    let addr: *const i32;
    {
        let a = Box::new(42);
        addr = &*a;
    }

    // allocate another Box with a different size
    let b: Box<u64> = Box::new(13);
    assert_eq!(addr, &*b as *const u64 as *const i32);
}
