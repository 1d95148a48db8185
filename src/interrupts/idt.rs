// https://wiki.osdev.org/Interrupt_Descriptor_Table
use super::gdt::{self, DescriptorTablePointer, KERNEL_CODE_SELECTOR};
use super::{DOUBLE_FAULT_VECTOR, GENERAL_PROTECTION_VECTOR, NUM_VECTORS, PAGE_FAULT_VECTOR};
use crate::assert_called_once;
use crate::memory::VirtualAddress;
use core::arch::asm;
use spin::Mutex;

const GATE_TYPE_INTERRUPT: u64 = 0xE;

unsafe extern "C" {
    /// 256 trampoline entry points, one per vector, laid down by the boot
    /// assembly. Each stub saves the scratch registers, pushes its vector
    /// number (and a zero error code when the CPU did not push one) and
    /// calls `irq_c_handler`.
    static IRQ_STUB_TABLE: [VirtualAddress; NUM_VECTORS];
}

/*
 * A gate descriptor is 16 bytes. Rather than trusting compiler bitfield
 * layout, both halves are assembled with explicit shifts:
 *   low:  offset[15:0] | selector << 16 | ist << 32 | type << 40
 *         | dpl << 45 | present << 47 | offset[31:16] << 48
 *   high: offset[63:32]
 */
#[repr(C)]
#[derive(Clone, Copy)]
struct GateDescriptor {
    low: u64,
    high: u64,
}

impl GateDescriptor {
    const fn missing() -> Self {
        GateDescriptor { low: 0, high: 0 }
    }

    /// Builds a present, DPL 0 interrupt gate for `target`. `ist` of 0 keeps
    /// the current stack; 1..=7 select a TSS interrupt stack.
    fn interrupt_gate(target: VirtualAddress, ist: u8) -> Self {
        let target = target as u64;

        let mut low = target & 0xFFFF;
        low |= (KERNEL_CODE_SELECTOR as u64) << 16;
        low |= ((ist & 0b111) as u64) << 32;
        low |= GATE_TYPE_INTERRUPT << 40;
        low |= 1 << 47; // present (dpl stays 0)
        low |= ((target >> 16) & 0xFFFF) << 48;

        GateDescriptor { low, high: target >> 32 }
    }
}

#[repr(C, align(16))]
struct InterruptDescriptorTable {
    entries: [GateDescriptor; NUM_VECTORS],
}

static IDT: Mutex<InterruptDescriptorTable> = Mutex::new(InterruptDescriptorTable {
    entries: [GateDescriptor::missing(); NUM_VECTORS],
});

/// Fills all 256 gates from the stub table and loads the IDT. The three
/// critical faults get dedicated stacks via the TSS interrupt stack table.
///
/// # Safety
///
/// May only be called once, with the GDT/TSS of `gdt::init()` in place.
pub(super) unsafe fn init() {
    assert_called_once!("Cannot call idt::init() more than once");

    let mut idt = IDT.lock();
    for (vector, &stub) in unsafe { IRQ_STUB_TABLE.iter().enumerate() } {
        let ist = match vector as u8 {
            DOUBLE_FAULT_VECTOR => gdt::DF_IST as u8 + 1,
            GENERAL_PROTECTION_VECTOR => gdt::GP_IST as u8 + 1,
            PAGE_FAULT_VECTOR => gdt::PF_IST as u8 + 1,
            _ => 0,
        };

        idt.entries[vector] = GateDescriptor::interrupt_gate(stub, ist);
    }

    let pointer = DescriptorTablePointer {
        limit: size_of::<InterruptDescriptorTable>() as u16 - 1,
        base: &raw const idt.entries as u64,
    };

    unsafe {
        asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}
