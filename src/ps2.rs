// https://wiki.osdev.org/%228042%22_PS/2_Controller
use crate::interrupts::InterruptGuard;
use crate::io_port::IoPort;
use crate::vga_buffer;
use crate::{assert_called_once, log};
use spin::Mutex;

const PS2_DATA_PORT: u16 = 0x60;
const PS2_STATUS_PORT: u16 = 0x64; // reads
const PS2_COMMAND_PORT: u16 = 0x64; // writes

// status register bits
const STATUS_OUTPUT_FULL: u8 = 1 << 0;
const STATUS_INPUT_FULL: u8 = 1 << 1;

// controller commands
const CMD_READ_CONFIG: u8 = 0x20;
const CMD_WRITE_CONFIG: u8 = 0x60;
const CMD_DISABLE_PORT_2: u8 = 0xA7;
const CMD_DISABLE_PORT_1: u8 = 0xAD;
const CMD_ENABLE_PORT_1: u8 = 0xAE;

// config byte bits
const CONFIG_PORT_1_INTERRUPT: u8 = 1 << 0;
const CONFIG_PORT_1_CLOCK_OFF: u8 = 1 << 4;
const CONFIG_PORT_1_TRANSLATION: u8 = 1 << 6;

// keyboard commands
const KBD_SET_SCANCODE_SET: u8 = 0xF0;
const KBD_ENABLE_SCANNING: u8 = 0xF4;
const KBD_RESET: u8 = 0xFF;

// scan code set 2 prefixes and state keys
const SCANCODE_BREAK: u8 = 0xF0;
const SCANCODE_EXTENDED: u8 = 0xE0;
const SCANCODE_LSHIFT: u8 = 0x12;
const SCANCODE_RSHIFT: u8 = 0x59;
const SCANCODE_CAPS_LOCK: u8 = 0x58;

#[rustfmt::skip]
const SCANMAP: [u8; 128] = [
         /* 0x00  0x01  0x02  0x03   0x04  0x05   0x06  0x07
          * 0x08  0x09  0x0A  0x0B   0x0C  0x0D   0x0E  0x0F */
/* 0x00 */  0,    0,    0,    0,     0,    0,     0,    0,
            0,    0,    0,    0,     0,    b'\t', b'`', 0,
/* 0x10 */  0,    0,    0,    0,     0,    b'q',  b'1', 0,
            0,    0,    b'z', b's',  b'a', b'w',  b'2', 0,
/* 0x20 */  0,    b'c', b'x', b'd',  b'e', b'4',  b'3', 0,
            0,    b' ', b'v', b'f',  b't', b'r',  b'5', 0,
/* 0x30 */  0,    b'n', b'b', b'h',  b'g', b'y',  b'6', 0,
            0,    0,    b'm', b'j',  b'u', b'7',  b'8', 0,
/* 0x40 */  0,    b',', b'k', b'i',  b'o', b'0',  b'9', 0,
            0,    b'.', b'/', b'l',  b';', b'p',  b'-', 0,
/* 0x50 */  0,    0,    b'\'', 0,    b'[', b'=',  0,    0,
            0,    0,    b'\n', b']', 0,    b'\\', 0,    0,
/* 0x60 */  0,    0,    0,    0,     0,    0,     0,    0,
            0,    b'1', 0,    b'4',  b'7', 0,     0,    0,
/* 0x70 */  b'0', b'.', b'2', b'5',  b'6', b'8',  0,    0,
            0,    b'+', b'3', b'-',  b'*', b'9',  0,    0,
];

#[rustfmt::skip]
const SCANMAP_SHIFT: [u8; 128] = [
         /* 0x00  0x01  0x02  0x03   0x04  0x05   0x06  0x07
          * 0x08  0x09  0x0A  0x0B   0x0C  0x0D   0x0E  0x0F */
/* 0x00 */  0,    0,    0,    0,     0,    0,     0,    0,
            0,    0,    0,    0,     0,    b'\t', b'~', 0,
/* 0x10 */  0,    0,    0,    0,     0,    b'Q',  b'!', 0,
            0,    0,    b'Z', b'S',  b'A', b'W',  b'@', 0,
/* 0x20 */  0,    b'C', b'X', b'D',  b'E', b'$',  b'#', 0,
            0,    b' ', b'V', b'F',  b'T', b'R',  b'%', 0,
/* 0x30 */  0,    b'N', b'B', b'H',  b'G', b'Y',  b'^', 0,
            0,    0,    b'M', b'J',  b'U', b'&',  b'*', 0,
/* 0x40 */  0,    b'<', b'K', b'I',  b'O', b')',  b'(', 0,
            0,    b'>', b'?', b'L',  b':', b'P',  b'_', 0,
/* 0x50 */  0,    0,    b'"', 0,     b'{', b'+',  0,    0,
            0,    0,    b'\n', b'}', 0,    b'|',  0,    0,
/* 0x60 */  0,    0,    0,    0,     0,    0,     0,    0,
            0,    b'1', 0,    b'4',  b'7', 0,     0,    0,
/* 0x70 */  b'0', b'.', b'2', b'5',  b'6', b'8',  0,    0,
            0,    b'+', b'3', b'-',  b'*', b'9',  0,    0,
];

struct KeyboardState {
    lshift: bool,
    rshift: bool,
    caps_lock: bool,

    // the 0xF0 break prefix arrives one interrupt before its key code
    break_next: bool,
}

static KEYBOARD: Mutex<KeyboardState> = Mutex::new(KeyboardState {
    lshift: false,
    rshift: false,
    caps_lock: false,
    break_next: false,
});

fn output_full() -> bool {
    IoPort::read_u8(PS2_STATUS_PORT) & STATUS_OUTPUT_FULL != 0
}

// TODO: give these polling loops a timeout so a wedged controller cannot
// hang the whole kernel
fn read_data() -> u8 {
    while !output_full() {}
    IoPort::read_u8(PS2_DATA_PORT)
}

fn write_data(value: u8) {
    while IoPort::read_u8(PS2_STATUS_PORT) & STATUS_INPUT_FULL != 0 {}
    IoPort::write_u8(PS2_DATA_PORT, value);
}

fn write_command(command: u8) {
    while IoPort::read_u8(PS2_STATUS_PORT) & STATUS_INPUT_FULL != 0 {}
    IoPort::write_u8(PS2_COMMAND_PORT, command);
}

/// Brings up the 8042 controller single-channel and resets the keyboard into
/// scan code set 2.
pub fn init() {
    assert_called_once!("Cannot call ps2::init() more than once");
    let _guard = InterruptGuard::cli();

    // quiet both ports while the controller is reconfigured
    write_command(CMD_DISABLE_PORT_1);
    write_command(CMD_DISABLE_PORT_2);

    // flush stale output
    while output_full() {
        IoPort::read_u8(PS2_DATA_PORT);
    }

    // keyboard interrupt on, clock on, scancode translation off
    write_command(CMD_READ_CONFIG);
    let mut config = read_data();
    config |= CONFIG_PORT_1_INTERRUPT;
    config &= !(CONFIG_PORT_1_CLOCK_OFF | CONFIG_PORT_1_TRANSLATION);
    write_command(CMD_WRITE_CONFIG);
    write_data(config);

    write_command(CMD_ENABLE_PORT_1);

    // reset the keyboard (ack + self-test result) and select set 2
    write_data(KBD_RESET);
    read_data();
    read_data();
    write_data(KBD_SET_SCANCODE_SET);
    read_data();
    write_data(2);
    read_data();
    write_data(KBD_ENABLE_SCANNING);
    read_data();

    log!(ok, "PS/2 keyboard initialized.");
}

/// Consumes one pending scancode, if any, and translates it through the
/// shift/caps state machines. Break codes and state keys yield no character.
pub fn get_char() -> Option<u8> {
    // callers may poll with interrupts enabled while the demux hook runs
    // from isr context, so the state lock needs the usual cli bracket
    let _guard = InterruptGuard::cli();

    if !output_full() {
        return None;
    }

    let code = IoPort::read_u8(PS2_DATA_PORT);
    let state = &mut *KEYBOARD.lock();

    if state.break_next {
        state.break_next = false;
        match code {
            SCANCODE_LSHIFT => state.lshift = false,
            SCANCODE_RSHIFT => state.rshift = false,
            _ => {}
        }

        return None;
    }

    match code {
        SCANCODE_BREAK => {
            state.break_next = true;
            None
        }
        SCANCODE_EXTENDED => None,
        SCANCODE_LSHIFT => {
            state.lshift = true;
            None
        }
        SCANCODE_RSHIFT => {
            state.rshift = true;
            None
        }
        SCANCODE_CAPS_LOCK => {
            state.caps_lock = !state.caps_lock;
            None
        }
        code if (code as usize) < SCANMAP.len() => {
            let map = if state.lshift || state.rshift { &SCANMAP_SHIFT } else { &SCANMAP };

            let mut chr = map[code as usize];
            if state.caps_lock && chr.is_ascii_alphabetic() {
                chr ^= 0x20; // flip the case
            }

            (chr != 0).then_some(chr)
        }
        _ => None,
    }
}

/// Keyboard demux hook, called by the interrupt dispatcher for PIC line 1
/// with interrupts disabled. Echoes decoded characters to the console.
pub fn keyboard_handle() {
    if let Some(chr) = get_char() {
        vga_buffer::console_put_char(chr);
    }
}
