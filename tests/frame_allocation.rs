#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(fragaria::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use fragaria::interrupts::{self, gdt};
use fragaria::memory::frames::FRAME_ALLOCATOR;
use fragaria::memory::{self, FRAME_PAGE_SIZE};
use fragaria::multiboot2::MbBootInfo;
use fragaria::serial_println;

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
fn pattern_round_trip() {
    let mut frames = [0usize; 100];

    for slot in frames.iter_mut() {
        let addr = FRAME_ALLOCATOR.allocate().expect("out of frames").addr();
        let page = addr as *mut u8;
        for offset in 0..FRAME_PAGE_SIZE {
            unsafe { page.add(offset).write_volatile((offset % 255) as u8) };
        }

        *slot = addr;
    }

    for &addr in frames.iter() {
        let page = addr as *const u8;
        for offset in 0..FRAME_PAGE_SIZE {
            assert_eq!(unsafe { page.add(offset).read_volatile() }, (offset % 255) as u8);
        }

        FRAME_ALLOCATOR.deallocate(addr);
    }
}

#[test_case]
fn freed_frames_are_reused() {
    let addr = FRAME_ALLOCATOR.allocate().expect("out of frames").addr();
    FRAME_ALLOCATOR.deallocate(addr);

    // the freed list is consulted before any region cursor moves
    let again = FRAME_ALLOCATOR.allocate().expect("out of frames").addr();
    assert_eq!(addr, again);

    FRAME_ALLOCATOR.deallocate(again);
}

#[test_case]
fn nested_pointer_array() {
    // one frame acting as an array of 512 frame addresses
    let table = FRAME_ALLOCATOR.allocate().expect("out of frames").addr() as *mut usize;

    for i in 0..512 {
        let addr = FRAME_ALLOCATOR.allocate().expect("out of frames").addr();
        unsafe {
            table.add(i).write_volatile(addr);
            (addr as *mut u64).write_volatile(i as u64);
        }
    }

    for i in 0..512 {
        let addr = unsafe { table.add(i).read_volatile() };
        assert_eq!(unsafe { (addr as *const u64).read_volatile() }, i as u64);
        FRAME_ALLOCATOR.deallocate(addr);
    }

    FRAME_ALLOCATOR.deallocate(table as usize);
    serial_println!("1+512 frames OK");
}

#[test_case]
fn double_free_is_not_fatal() {
    let addr = FRAME_ALLOCATOR.allocate().expect("out of frames").addr();
    FRAME_ALLOCATOR.deallocate(addr);

    // the second free is reported and ignored
    FRAME_ALLOCATOR.deallocate(addr);

    let again = FRAME_ALLOCATOR.allocate().expect("out of frames").addr();
    assert_eq!(addr, again);
    FRAME_ALLOCATOR.deallocate(again);
}

#[test_case]
fn exhaustion_then_recovery() {
    const CHAIN_END: usize = usize::MAX;

    // chain every remaining frame through its own first two words
    let mut head = CHAIN_END;
    let mut count: u64 = 0;

    loop {
        let addr = match FRAME_ALLOCATOR.allocate() {
            Ok(frame) => frame.addr(),
            Err(_) => break,
        };

        let slots = addr as *mut u64;
        unsafe {
            slots.write_volatile(head as u64);
            slots.add(1).write_volatile(count);
        }

        head = addr;
        count += 1;
    }

    assert!(count > 0);
    serial_println!("allocated {} frames before running dry", count);

    // walk the chain backwards, verifying and freeing
    while head != CHAIN_END {
        let slots = head as *const u64;
        count -= 1;
        assert_eq!(unsafe { slots.add(1).read_volatile() }, count);

        let prev = unsafe { slots.read_volatile() } as usize;
        FRAME_ALLOCATOR.deallocate(head);
        head = prev;
    }

    assert_eq!(count, 0);

    // and the allocator must have recovered
    let frame = FRAME_ALLOCATOR.allocate().expect("allocator did not recover");
    FRAME_ALLOCATOR.deallocate(frame.addr());
    serial_println!("Test OK");
}
