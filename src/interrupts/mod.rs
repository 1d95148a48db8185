pub mod gdt;
pub mod idt;
pub mod pic;
pub mod tss;

use crate::memory::VirtualAddress;
use crate::{assert_called_once, println, ps2, serial};
use core::arch::asm;
use core::ptr::null_mut;
use spin::Mutex;

pub const NUM_VECTORS: usize = 256;

// exception vectors with dedicated ist stacks
pub const DOUBLE_FAULT_VECTOR: u8 = 0x08;
pub const GENERAL_PROTECTION_VECTOR: u8 = 0x0D;
pub const PAGE_FAULT_VECTOR: u8 = 0x0E;

const IFLAGS_IF: u64 = 0x0200;

pub fn interrupts_enabled() -> bool {
    let flags: u64;
    unsafe {
        asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }

    flags & IFLAGS_IF != 0
}

pub fn enable_interrupts() {
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

pub fn disable_interrupts() {
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

/// Critical-section guard: clears IF on construction and restores the
/// previous state on drop, so guarded sections nest correctly no matter
/// whether the caller already runs with interrupts disabled.
pub struct InterruptGuard {
    was_enabled: bool,
}

impl InterruptGuard {
    pub fn cli() -> Self {
        let was_enabled = interrupts_enabled();
        if was_enabled {
            disable_interrupts();
        }

        InterruptGuard { was_enabled }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            enable_interrupts();
        }
    }
}

pub type IrqHandler = fn(vector: u8, error: u32, cr2: VirtualAddress, arg: *mut ());

#[derive(Clone, Copy)]
struct IrqSlot {
    handler: Option<IrqHandler>,
    arg: *mut (),
}

// the args are opaque pointers owned by whoever registered the handler
unsafe impl Send for IrqSlot {}

const EMPTY_SLOT: IrqSlot = IrqSlot {
    handler: None,
    arg: null_mut(),
};

static IRQ_TABLE: Mutex<[IrqSlot; NUM_VECTORS]> = Mutex::new([EMPTY_SLOT; NUM_VECTORS]);

/// The machine state pushed by the CPU (and the vector stubs) on interrupt
/// entry. The stubs hand us a pointer to it for diagnostics.
#[repr(C)]
pub struct InterruptStackFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Registers (or with `None`, removes) the handler for a vector. Safe to call
/// before `init()`; the table starts out empty.
pub fn set_handler(vector: u8, handler: Option<IrqHandler>, arg: *mut ()) {
    let _guard = InterruptGuard::cli();
    IRQ_TABLE.lock()[vector as usize] = IrqSlot { handler, arg };
}

/// Common C entry point; every vector stub funnels here after saving
/// registers and normalizing the error code.
#[unsafe(no_mangle)]
pub extern "C" fn irq_c_handler(vector: u64, error: u64, cr2: u64, frame: *const InterruptStackFrame) {
    let vector = (vector as usize % NUM_VECTORS) as u8;
    let slot = IRQ_TABLE.lock()[vector as usize];

    match slot.handler {
        Some(handler) => handler(vector, error as u32, cr2 as VirtualAddress, slot.arg),
        None => {
            println!("ERROR: Unhandled interrupt: {:#x} Error: {:#x} CR2: {:#x}", vector, error, cr2);
            if let Some(frame) = unsafe { frame.as_ref() } {
                println!("    RIP: {:#x}  CS: {:#x}", frame.rip, frame.cs);
                println!("    RFLAGS: {:#x}", frame.rflags);
                println!("    RSP: {:#x}  SS: {:#x}", frame.rsp, frame.ss);
            }

            crate::hlt();
        }
    }
}

// built-in demux for the 16 legacy pic lines: hand the line to its driver and
// acknowledge the pic(s)
fn pic_demux(vector: u8, _error: u32, _cr2: VirtualAddress, _arg: *mut ()) {
    let line = vector - pic::PIC_1_OFFSET;

    match line {
        pic::KEYBOARD_LINE => ps2::keyboard_handle(),
        pic::COM2_LINE | pic::COM1_LINE => serial::pic_handle(),
        _ => println!("Unhandled PIC IRQ: {}", line),
    }

    pic::end_of_interrupt(line);
}

/// Remaps the legacy PICs, masks all 16 lines, installs the PIC demux and
/// loads the IDT. Interrupts stay disabled; the caller decides when to STI.
///
/// # Safety
///
/// May only be called once, after `gdt::init()` (the gates reference the
/// kernel code selector and the fault-stack IST slots).
pub unsafe fn init() {
    assert_called_once!("Cannot call interrupts::init() more than once");
    let _guard = InterruptGuard::cli();

    unsafe {
        pic::remap(pic::PIC_1_OFFSET, pic::PIC_2_OFFSET);
    }
    pic::mask_all();

    for vector in pic::PIC_1_OFFSET..pic::PIC_2_OFFSET + 8 {
        set_handler(vector, Some(pic_demux), null_mut());
    }

    unsafe {
        idt::init();
    }
}
