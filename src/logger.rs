use crate::interrupts::InterruptGuard;
use crate::vga_buffer::{Color, WRITER};
use crate::{serial, vga_buffer};
use core::fmt;

/// The kernel printk: fans a formatted message out to both the vga console
/// and the serial port.
pub fn printk(args: fmt::Arguments) {
    vga_buffer::write_fmt(args);
    serial::write_fmt(args);
}

pub struct Logger;

impl Logger {
    pub fn ok(fmt: fmt::Arguments) {
        Self::status(Color::LightGreen, "  OK  ", fmt);
    }

    pub fn warn(fmt: fmt::Arguments) {
        Self::status(Color::Yellow, " WARN ", fmt);
    }

    pub fn failed(fmt: fmt::Arguments) {
        Self::status(Color::LightRed, "FAILED", fmt);
    }

    // [  OK  ] message
    fn status(color: Color, label: &str, fmt: fmt::Arguments) {
        {
            use core::fmt::Write;

            let _guard = InterruptGuard::cli();
            let writer = &mut *WRITER.lock();

            writer.write_str("[");
            writer.set_colors(color, Color::Black);
            writer.write_str(label);
            writer.set_colors(Color::White, Color::Black);
            writer.write_str("] ");
            writer.write_fmt(fmt).unwrap();
            writer.write_chr(b'\n');
        }

        serial::write_fmt(format_args!("[{}] {}\n", label, fmt));
    }
}

#[macro_export]
macro_rules! log {
    ( $method:ident, $($arg:tt)* ) => {{
        use $crate::logger::Logger;
        Logger::$method(format_args!($($arg)*));
    }};
}
