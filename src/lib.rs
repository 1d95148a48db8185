#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

pub mod macros;
pub mod io_port;
pub mod logger;
pub mod vga_buffer;
pub mod serial;
pub mod interrupts;
pub mod memory;
pub mod multiboot2;
pub mod ps2;

use core::arch::asm;
use core::panic::PanicInfo;
use io_port::IoPort;

/// Parks the CPU, waking only to service interrupts.
pub fn hlt() -> ! {
    loop {
        unsafe {
            asm!("hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

// qemu exposes these through the isa-debug-exit device (iobase 0xF4)
#[derive(Clone, Copy)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) {
    IoPort::write_u32(0xF4, exit_code as u32);
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]");
    serial_println!("Error: {}", info);
    exit_qemu(QemuExitCode::Failed);
    hlt();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info);
}

/// # Safety
///
/// The caller (the asm) must ensure that `mb_boot_info_addr` points to a valid
/// multiboot2 structure. This function may only be called once.
#[cfg(test)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmain(magic: u32, mb_boot_info_addr: *const u8) -> ! {
    let mb_info = unsafe { multiboot2::MbBootInfo::new(magic, mb_boot_info_addr) }.expect("Invalid multiboot2 data");

    unsafe {
        interrupts::gdt::init();
        interrupts::init();
        memory::init(&mb_info).expect("Could not initialize the memory subsystem");
    }

    test_main();
    hlt();
}
