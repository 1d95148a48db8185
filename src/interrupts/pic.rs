// https://wiki.osdev.org/8259_PIC
use crate::io_port::{io_wait, IoPort};
use bitflags::bitflags;

const PIC_1: u16 = 0x20; // main PIC, lines 0-7
const PIC_2: u16 = 0xA0; // second PIC, lines 8-15
const PIC_1_COMMAND: u16 = PIC_1;
const PIC_1_DATA: u16 = PIC_1 + 1;
const PIC_2_COMMAND: u16 = PIC_2;
const PIC_2_DATA: u16 = PIC_2 + 1;

const PIC_EOI: u8 = 0x20;

/// The vector bases both PICs get remapped to; lines 0-15 then arrive as
/// vectors 0x20..=0x2F, clear of the CPU exception range.
pub const PIC_1_OFFSET: u8 = 0x20;
pub const PIC_2_OFFSET: u8 = 0x28;

// the pic lines with drivers attached
pub const KEYBOARD_LINE: u8 = 1;
pub const CASCADE_LINE: u8 = 2;
pub const COM2_LINE: u8 = 3;
pub const COM1_LINE: u8 = 4;

bitflags! {
    struct Icw1: u8 {
        const ICW4_NEEDED = 0x01;
        const SINGLE      = 0x02;
        const INTERVAL4   = 0x04;
        const LEVEL       = 0x08;
        const INIT        = 0x10;
    }
}

bitflags! {
    struct Icw4: u8 {
        const MODE_8086  = 0x01;
        const AUTO_EOI   = 0x02;
        const BUF_SECOND = 0x08;
        const BUF_FIRST  = 0x0C;
        const SFNM       = 0x10;
    }
}

/// Runs the 8259A init sequence on both PICs: vectors from `offset1`/`offset2`,
/// cascade on line 2, 8086 mode. The line masks are preserved across the remap.
///
/// # Safety
///
/// The caller must ensure interrupts are disabled for the whole sequence.
pub(super) unsafe fn remap(offset1: u8, offset2: u8) {
    // save masks
    let mask1 = IoPort::read_u8(PIC_1_DATA);
    let mask2 = IoPort::read_u8(PIC_2_DATA);

    // start init
    IoPort::write_u8(PIC_1_COMMAND, (Icw1::INIT | Icw1::ICW4_NEEDED).bits());
    io_wait();
    IoPort::write_u8(PIC_2_COMMAND, (Icw1::INIT | Icw1::ICW4_NEEDED).bits());
    io_wait();

    // vector bases
    IoPort::write_u8(PIC_1_DATA, offset1);
    io_wait();
    IoPort::write_u8(PIC_2_DATA, offset2);
    io_wait();

    // tell PIC1 that PIC2 hangs off line 2, and PIC2 its cascade identity
    IoPort::write_u8(PIC_1_DATA, 1 << CASCADE_LINE);
    io_wait();
    IoPort::write_u8(PIC_2_DATA, CASCADE_LINE);
    io_wait();

    IoPort::write_u8(PIC_1_DATA, Icw4::MODE_8086.bits());
    io_wait();
    IoPort::write_u8(PIC_2_DATA, Icw4::MODE_8086.bits());
    io_wait();

    // restore masks
    IoPort::write_u8(PIC_1_DATA, mask1);
    IoPort::write_u8(PIC_2_DATA, mask2);
}

fn line_port(line: u8) -> (u16, u8) {
    if line < 8 {
        (PIC_1_DATA, line)
    } else {
        (PIC_2_DATA, line - 8)
    }
}

pub fn set_mask(line: u8) {
    let (port, line) = line_port(line);
    let value = IoPort::read_u8(port) | (1 << line);
    IoPort::write_u8(port, value);
}

pub fn clear_mask(line: u8) {
    let (port, line) = line_port(line);
    let value = IoPort::read_u8(port) & !(1 << line);
    IoPort::write_u8(port, value);
}

pub fn get_mask(line: u8) -> bool {
    let (port, line) = line_port(line);
    IoPort::read_u8(port) & (1 << line) != 0
}

pub fn mask_all() {
    for line in 0..16 {
        set_mask(line);
    }
}

/// Acknowledges a serviced line; lines 8-15 need the ack on both PICs.
pub fn end_of_interrupt(line: u8) {
    if line >= 8 {
        IoPort::write_u8(PIC_2_COMMAND, PIC_EOI);
    }

    IoPort::write_u8(PIC_1_COMMAND, PIC_EOI);
}
