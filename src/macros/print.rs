// print!/println! are the kernel printk: everything goes to both the vga
// console and the serial port so diagnostics survive a dead display.

#[macro_export]
macro_rules! println {
    ( $fmt:expr, $($arg:tt)* ) => {{ use $crate::print; print!(concat!($fmt, "\n"), $($arg)*) }};
    ( $fmt:expr ) => {{ use $crate::print; print!(concat!($fmt, "\n")) }};
    () => {{ use $crate::print; print!("\n") }};
}

#[macro_export]
macro_rules! print {
    ( $($arg:tt)* ) => {{
        $crate::logger::printk(format_args!($($arg)*));
    }};
}
