pub mod print;
pub mod serial;

/// Guards one-shot initializers: the second call through the same macro
/// expansion panics with the given message.
#[macro_export]
macro_rules! assert_called_once {
    ( $($arg:tt)* ) => {{
        use core::sync::atomic::{AtomicBool, Ordering};
        static CALLED: AtomicBool = AtomicBool::new(false);

        if CALLED.swap(true, Ordering::SeqCst) {
            panic!($($arg)*);
        }
    }};
}
