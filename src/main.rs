#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(fragaria::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;
use fragaria::interrupts::{self, gdt, pic};
use fragaria::multiboot2::MbBootInfo;
use fragaria::{log, memory, println, ps2, vga_buffer};

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log!(failed, "Kernel panic occurred!");
    println!("{}", info);
    fragaria::hlt();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    fragaria::test_panic_handler(info);
}

/// # Safety
///
/// The caller (the boot asm) must enter in 64-bit long mode with interrupts
/// disabled, the low identity map active and `mb_boot_info_addr` pointing at
/// the Multiboot2 structure. This function may only be called once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmain(magic: u32, mb_boot_info_addr: *const u8) -> ! {
    vga_buffer::console_clear();
    log!(ok, "fragaria starting.");

    let mb_info = match unsafe { MbBootInfo::new(magic, mb_boot_info_addr) } {
        Ok(mb_info) => mb_info,
        Err(err) => {
            log!(failed, "Bad multiboot2 handoff: {:?}", err);
            fragaria::hlt();
        }
    };

    unsafe {
        gdt::init();
        log!(ok, "GDT and TSS loaded.");

        // PICs remapped and fully masked, IDT loaded, demux installed
        interrupts::init();
        log!(ok, "Interrupts set up.");

        memory::init(&mb_info).expect("Could not initialize the memory subsystem");
        log!(ok, "Memory subsystem initialized.");

        ps2::init();
    }

    // unmask the lines with drivers behind them, then let interrupts through
    pic::clear_mask(pic::KEYBOARD_LINE);
    pic::clear_mask(pic::COM2_LINE);
    pic::clear_mask(pic::COM1_LINE);
    interrupts::enable_interrupts();

    #[cfg(test)]
    test_main();

    println!("fragaria ready.");
    fragaria::hlt();
}
