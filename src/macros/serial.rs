#[macro_export]
macro_rules! serial_println {
    ( $fmt:expr, $($arg:tt)* ) => {{
        use $crate::serial_print;
        serial_print!(concat!($fmt, "\n"), $($arg)*);
    }};

    ( $fmt:expr ) => {{
        use $crate::serial_print;
        serial_print!(concat!($fmt, "\n"));
    }};
}

#[macro_export]
macro_rules! serial_print {
    ( $($arg:tt)* ) => {{
        $crate::serial::write_fmt(format_args!($($arg)*));
    }};
}
