use crate::interrupts::InterruptGuard;
use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

#[repr(u8)]
#[allow(dead_code)]
#[derive(Clone, Copy)]
pub enum Color {
    Black = 0x0,
    Blue = 0x1,
    Green = 0x2,
    Cyan = 0x3,
    Red = 0x4,
    Magenta = 0x5,
    Brown = 0x6,
    LightGray = 0x7,
    Gray = 0x8,
    LightBlue = 0x9,
    LightGreen = 0xa,
    LightCyan = 0xb,
    LightRed = 0xc,
    Pink = 0xd,
    Yellow = 0xe,
    White = 0xf,
}

#[repr(transparent)]
#[derive(Clone, Copy)]
struct ColorCode(u8);

impl ColorCode {
    const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode((background as u8) << 0x4 | (foreground as u8))
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ScreenChar {
    ascii_char: u8,
    color_code: ColorCode,
}

#[repr(transparent)]
struct ScreenBuff {
    chars: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

pub struct Writer {
    column: usize,
    row: usize,
    color_code: ColorCode,
    buffer: &'static mut ScreenBuff,
}

impl Writer {
    pub fn write_chr(&mut self, chr: u8) {
        match chr {
            // match printable ascii characters
            0x20..=0x7e => {
                if self.column >= BUFFER_WIDTH {
                    self.new_line();
                }

                self.buffer.chars[self.row][self.column] = ScreenChar {
                    ascii_char: chr,
                    color_code: self.color_code,
                };

                self.column += 1;
            }
            b'\n' => self.new_line(),
            _ => {}
        }
    }

    pub fn write_str(&mut self, str: &str) {
        for chr in str.bytes() {
            self.write_chr(chr);
        }
    }

    fn new_line(&mut self) {
        self.column = 0;

        if self.row + 1 < BUFFER_HEIGHT {
            self.row += 1;
            return;
        }

        // shift every row up by one; rows never overlap themselves so a
        // straight copy per row is safe even on the real vga memory
        for row in 1..BUFFER_HEIGHT {
            self.buffer.chars.copy_within(row..row + 1, row - 1);
        }

        self.clear_row(BUFFER_HEIGHT - 1);
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_char: b' ',
            color_code: self.color_code,
        };

        self.buffer.chars[row] = [blank; BUFFER_WIDTH];
    }

    pub fn clear(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }

        self.column = 0;
        self.row = 0;
    }

    pub fn set_colors(&mut self, foreground: Color, background: Color) {
        self.color_code = ColorCode::new(foreground, background);
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_str(s);
        Ok(())
    }
}

// spin locks are not the best but they work and we have no concept of blocking
// or even threads in this os to use a better alternative
lazy_static! {
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        column: 0,
        row: 0,
        color_code: ColorCode::new(Color::White, Color::Black),
        buffer: unsafe { &mut *(0xb8000 as *mut ScreenBuff) },
    });
}

pub fn write_fmt(args: fmt::Arguments) {
    use core::fmt::Write;

    // keyboard echo prints from isr context, so the lock may never be held
    // with interrupts enabled
    let _guard = InterruptGuard::cli();
    WRITER.lock().write_fmt(args).unwrap();
}

pub fn console_put_char(chr: u8) {
    let _guard = InterruptGuard::cli();
    WRITER.lock().write_chr(chr);
}

pub fn console_clear() {
    let _guard = InterruptGuard::cli();
    WRITER.lock().clear();
}
