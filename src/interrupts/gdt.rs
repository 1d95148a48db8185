// https://wiki.osdev.org/Global_Descriptor_Table
use super::tss::TaskStateSegment;
use super::InterruptGuard;
use crate::assert_called_once;
use crate::memory::VirtualAddress;
use bitflags::bitflags;
use core::arch::asm;
use spin::Mutex;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const TSS_SELECTOR: u16 = 0x10;

// interrupt-stack-table slot assignments (0-based; gates use slot + 1)
pub const DF_IST: usize = 0;
pub const PF_IST: usize = 1;
pub const GP_IST: usize = 2;

const GDT_SLOTS: usize = 8;
const FAULT_STACK_SIZE: usize = 4 * 4096;

const TSS_TYPE_64_AVAILABLE: u64 = 0b1001;

bitflags! {
    struct SegmentAccess: u8 {
        const ACCESSED     = 1 << 0;
        const RW           = 1 << 1;
        const CONFORMING   = 1 << 2; // direction bit for data segments
        const EXECUTABLE   = 1 << 3;
        const USER_SEGMENT = 1 << 4; // code/data rather than system descriptor
        const DPL_LO       = 1 << 5;
        const DPL_HI       = 1 << 6;
        const PRESENT      = 1 << 7;
    }
}

/// Ring-0 long-mode code segment. Base and limit are ignored in 64-bit mode;
/// only the access byte (bits 40..48) and the L flag (bit 53) matter.
fn code_descriptor() -> u64 {
    let access = SegmentAccess::CONFORMING
        | SegmentAccess::EXECUTABLE
        | SegmentAccess::USER_SEGMENT
        | SegmentAccess::PRESENT;

    ((access.bits() as u64) << 40) | (1 << 53)
}

/// 64-bit TSS descriptor; takes two consecutive GDT slots.
fn tss_descriptor(base: u64, limit: u32) -> (u64, u64) {
    let mut low = limit as u64 & 0xFFFF;
    low |= (base & 0xFF_FFFF) << 16;
    low |= TSS_TYPE_64_AVAILABLE << 40;
    low |= 1 << 47; // present, dpl 0
    low |= ((limit as u64 >> 16) & 0xF) << 48;
    low |= ((base >> 24) & 0xFF) << 56;

    (low, base >> 32)
}

/*
 * Statically allocated stacks for the faults that must be able to fire even
 * when the kernel stack itself is the problem. The CPU switches to these via
 * the TSS interrupt stack table.
 */
#[repr(C, align(16))]
struct FaultStack([u8; FAULT_STACK_SIZE]);

static mut DF_STACK: FaultStack = FaultStack([0; FAULT_STACK_SIZE]);
static mut PF_STACK: FaultStack = FaultStack([0; FAULT_STACK_SIZE]);
static mut GP_STACK: FaultStack = FaultStack([0; FAULT_STACK_SIZE]);

fn stack_top(stack: *mut FaultStack) -> VirtualAddress {
    stack as VirtualAddress + FAULT_STACK_SIZE
}

#[repr(C, packed)]
pub(super) struct DescriptorTablePointer {
    pub(super) limit: u16,
    pub(super) base: u64,
}

struct Gdt {
    table: [u64; GDT_SLOTS],
    next_free: u8,
}

static GDT: Mutex<Gdt> = Mutex::new(Gdt {
    table: [0; GDT_SLOTS],
    next_free: 0,
});

static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());

/// Builds and loads the kernel GDT and TSS. After this the three critical
/// fault vectors can run on their dedicated stacks.
///
/// # Safety
///
/// May only be called once. All segment registers must already hold values
/// that stay valid under the new table (the boot GDT uses the same layout).
pub unsafe fn init() {
    assert_called_once!("Cannot call gdt::init() more than once");

    let mut tss = TSS.lock();
    tss.set_ist(DF_IST, stack_top(&raw mut DF_STACK));
    tss.set_ist(PF_IST, stack_top(&raw mut PF_STACK));
    tss.set_ist(GP_IST, stack_top(&raw mut GP_STACK));
    tss.set_iopb_absent();

    let tss_base = &raw const *tss as u64;
    let tss_limit = (size_of::<TaskStateSegment>() - 1) as u32;

    let mut gdt = GDT.lock();
    gdt.table[0] = 0; // null descriptor
    gdt.table[1] = code_descriptor();

    let (tss_low, tss_high) = tss_descriptor(tss_base, tss_limit);
    gdt.table[2] = tss_low;
    gdt.table[3] = tss_high;

    // slot 0 is null, 1 is kernel code, 2-3 hold the TSS; 4 onwards stays
    // free for user-mode segments
    gdt.next_free = 4;

    let pointer = DescriptorTablePointer {
        limit: size_of::<[u64; GDT_SLOTS]>() as u16 - 1,
        base: &raw const gdt.table as u64,
    };

    // swap tables with interrupts disabled; the guard restores the old IF
    let _guard = InterruptGuard::cli();
    unsafe {
        asm!("lgdt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nomem, nostack, preserves_flags));
    }
}
