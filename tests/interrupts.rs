#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(fragaria::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::arch::asm;
use core::ptr::null_mut;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicUsize, Ordering};
use fragaria::interrupts::{self, gdt, pic};
use fragaria::memory::VirtualAddress;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    fragaria::test_panic_handler(info);
}

/// # Safety
///
/// This function may only be called once, by the boot asm.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmain(_magic: u32, _mb_boot_info_addr: *const u8) -> ! {
    unsafe {
        gdt::init();
        interrupts::init();
    }

    test_main();
    fragaria::hlt();
}

#[test_case]
fn masks_are_idempotent() {
    pic::set_mask(5);
    assert!(pic::get_mask(5));
    pic::set_mask(5);
    assert!(pic::get_mask(5));

    pic::clear_mask(5);
    assert!(!pic::get_mask(5));
    pic::clear_mask(5);
    assert!(!pic::get_mask(5));

    // leave the line masked like interrupts::init() did
    pic::set_mask(5);
}

#[test_case]
fn masks_cover_the_second_pic() {
    pic::clear_mask(12);
    assert!(!pic::get_mask(12));
    pic::set_mask(12);
    assert!(pic::get_mask(12));
}

static FIRED: AtomicUsize = AtomicUsize::new(0);

fn counting_handler(vector: u8, error: u32, _cr2: VirtualAddress, _arg: *mut ()) {
    assert_eq!(vector, 0x80);
    assert_eq!(error, 0);
    FIRED.fetch_add(1, Ordering::SeqCst);
}

#[test_case]
fn software_interrupt_dispatch() {
    interrupts::set_handler(0x80, Some(counting_handler), null_mut());

    unsafe {
        asm!("int 0x80");
        asm!("int 0x80");
    }

    assert_eq!(FIRED.load(Ordering::SeqCst), 2);
    interrupts::set_handler(0x80, None, null_mut());
}
