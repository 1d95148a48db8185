#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(fragaria::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use fragaria::{println, serial_println};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    fragaria::test_panic_handler(info);
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmain(_magic: u32, _mb_boot_info_addr: *const u8) -> ! {
    test_main();
    fragaria::hlt();
}

#[test_case]
fn console_output() {
    println!("printk reaches the console and the serial port");
}

#[test_case]
fn serial_output() {
    serial_println!("serial-only output works");
}
