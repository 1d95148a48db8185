#![allow(dead_code)]

// https://wiki.osdev.org/Serial_Ports
use crate::interrupts::InterruptGuard;
use crate::io_port::IoPort;
use bitflags::bitflags;
use core::fmt;
use spin::Mutex;

// 0x3F8 is the default addr for COM1
const COM1: u16 = 0x3F8;

const TX_BUFF_LEN: usize = 1024;

bitflags! {
    struct LineStatus: u8 {
        const DATA_READY = 1 << 0;
        const TX_EMPTY   = 1 << 5;
    }
}

struct SerialPortInner {
    port: u16,

    // circular tx buffer, drained one byte per thr-empty interrupt
    tx_buff: [u8; TX_BUFF_LEN],
    produce: usize,
    consume: usize,

    initialized: bool,
}

pub struct SerialPort(Mutex<SerialPortInner>);

pub static SERIAL_PORT: SerialPort = SerialPort(Mutex::new(SerialPortInner {
    port: COM1,
    tx_buff: [0; TX_BUFF_LEN],
    produce: 0,
    consume: 0,
    initialized: false,
}));

impl SerialPortInner {
    #[allow(clippy::identity_op)]
    fn init_hw(&mut self) {
        IoPort::write_u8(self.port + 1, 0x00); // disable all uart interrupts while programming
        IoPort::write_u8(self.port + 3, 0x80); // enable DLAB (set baud rate divisor)
        IoPort::write_u8(self.port + 0, 0x0C); // set divisor to 12 (lo byte) 9600 baud rate
        IoPort::write_u8(self.port + 1, 0x00); //                   (hi byte)
        IoPort::write_u8(self.port + 3, 0x03); // 8 bits, no parity, one stop bit
        IoPort::write_u8(self.port + 2, 0xC7); // enable FIFO, clear them, with 14-byte threshold
        IoPort::write_u8(self.port + 4, 0x0B); // IRQs enabled, RTS/DSR set
        IoPort::write_u8(self.port + 1, 0x02); // interrupt on transmitter-holding-register empty

        self.initialized = true;
    }

    fn line_status(&self) -> LineStatus {
        LineStatus::from_bits_truncate(IoPort::read_u8(self.port + 5))
    }

    /// Pushes one buffered byte into the transmitter if it is idle. This is
    /// both the ISR body and the kick that restarts a stalled transmission.
    fn drain_one(&mut self) {
        if self.produce == self.consume {
            return;
        }

        if self.line_status().contains(LineStatus::TX_EMPTY) {
            IoPort::write_u8(self.port, self.tx_buff[self.consume]);
            self.consume = (self.consume + 1) % TX_BUFF_LEN;
        }
    }

    /// Synchronously empties the ring. Needed whenever the THR-empty
    /// interrupt cannot do it: before the PIC line is unmasked, or with
    /// interrupts disabled.
    fn drain_all(&mut self) {
        while self.produce != self.consume {
            while !self.line_status().contains(LineStatus::TX_EMPTY) {}
            IoPort::write_u8(self.port, self.tx_buff[self.consume]);
            self.consume = (self.consume + 1) % TX_BUFF_LEN;
        }
    }

    fn enqueue(&mut self, byte: u8) {
        let next = (self.produce + 1) % TX_BUFF_LEN;

        // ring full: fall back to a synchronous drain instead of dropping output
        if next == self.consume {
            while !self.line_status().contains(LineStatus::TX_EMPTY) {}
            IoPort::write_u8(self.port, self.tx_buff[self.consume]);
            self.consume = (self.consume + 1) % TX_BUFF_LEN;
        }

        self.tx_buff[self.produce] = byte;
        self.produce = next;
    }
}

impl fmt::Write for SerialPortInner {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // buffer all the bytes 'as is'
        for byte in s.bytes() {
            self.enqueue(byte);
        }

        Ok(())
    }
}

pub fn write_fmt(args: fmt::Arguments) {
    use core::fmt::Write;

    // when the caller runs with interrupts enabled the thr-empty interrupt
    // chains the transmission; otherwise nothing would ever drain the ring
    let irq_driven = crate::interrupts::interrupts_enabled();

    let _guard = InterruptGuard::cli();
    let inner = &mut *SERIAL_PORT.0.lock();
    if !inner.initialized {
        inner.init_hw();
    }

    inner.write_fmt(args).unwrap();
    if irq_driven {
        inner.drain_one();
    } else {
        inner.drain_all();
    }
}

/// COM1/COM2 demux hook, called by the interrupt dispatcher for PIC lines 3
/// and 4 with interrupts disabled.
pub fn pic_handle() {
    let inner = &mut *SERIAL_PORT.0.lock();
    inner.drain_one();
}
