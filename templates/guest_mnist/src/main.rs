//! MNIST template (784 pixels -> hidden -> 10 classes), integer-only.
//!
//! The model section below is generated by `modelkit export --template`.
#![no_std]
#![no_main]

use core::panic::PanicInfo;

mod config;
use config::*;

// ============================================================================
//  Panic / Entry
// ============================================================================

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    unsafe { core::arch::asm!("ebreak") };
    loop {}
}

#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "li sp, {stack_ptr}",
        "j {rust_main}",
        stack_ptr = const STACK_PTR,
        rust_main = sym rust_main,
    );
}

// ============================================================================
//  Control block layout
// ============================================================================

const FBM1_MAGIC: u32 = 0x314D_4246; // "FBM1"

const CTRL_MAGIC: usize = 0;
const CTRL_ABI_VERSION: usize = 4;
const CTRL_STATUS: usize = 12;
const CTRL_INPUT_PTR: usize = 16;
const CTRL_INPUT_LEN: usize = 20;
const CTRL_OUTPUT_PTR: usize = 24;
const CTRL_OUTPUT_LEN: usize = 28;

// ============================================================================
//  Error codes
// ============================================================================

const ERR_OK: u32 = 0;
const ERR_CTRL: u32 = 1;
const ERR_INPUT_BOUNDS: u32 = 4;
const ERR_OUTPUT_BOUNDS: u32 = 5;
const ERR_NOT_READY: u32 = 6;

// ============================================================================
//  Syscalls
// ============================================================================

const SYSCALL_EXIT: u32 = 93;

#[inline(always)]
unsafe fn sys_exit(code: u32) -> ! {
    core::arch::asm!(
        "ecall",
        in("a0") code,
        in("a7") SYSCALL_EXIT,
        options(noreturn)
    );
}

// ============================================================================
//  Helpers
// ============================================================================

#[inline(always)]
fn scratch_addr(offset: usize) -> u64 {
    offset as u64
}

#[inline(always)]
unsafe fn read_u32(addr: u64) -> u32 {
    (addr as *const u32).read_volatile()
}

#[inline(always)]
unsafe fn write_u32(addr: u64, value: u32) {
    (addr as *mut u32).write_volatile(value);
}

#[inline(always)]
unsafe fn fail(ctrl_base: u64, code: u32) -> ! {
    write_u32(ctrl_base + CTRL_STATUS as u64, code);
    sys_exit(code);
}

// ============================================================================
//  Model
// ============================================================================

// @modelkit:begin model
// Run `modelkit export --template templates/guest_mnist/src/main.rs` to
// generate INPUT_SIZE, predict(), get_model_info() and is_ready().
// @modelkit:end model

// ============================================================================
//  Entry
// ============================================================================

#[no_mangle]
pub extern "C" fn rust_main() -> ! {
    unsafe {
        let ctrl_base = scratch_addr(CONTROL_OFFSET);
        let magic = read_u32(ctrl_base + CTRL_MAGIC as u64);
        let abi_version = read_u32(ctrl_base + CTRL_ABI_VERSION as u64);
        if magic != FBM1_MAGIC || abi_version != 1 {
            fail(ctrl_base, ERR_CTRL);
        }
        if !is_ready() {
            fail(ctrl_base, ERR_NOT_READY);
        }

        let input_ptr = read_u32(ctrl_base + CTRL_INPUT_PTR as u64) as u64;
        let input_len = read_u32(ctrl_base + CTRL_INPUT_LEN as u64) as usize;
        let output_ptr = read_u32(ctrl_base + CTRL_OUTPUT_PTR as u64) as u64;

        if input_len > INPUT_MAX || input_len < INPUT_SIZE {
            fail(ctrl_base, ERR_INPUT_BOUNDS);
        }
        let output_bytes = 4usize;
        if output_bytes > OUTPUT_MAX {
            fail(ctrl_base, ERR_OUTPUT_BOUNDS);
        }

        let pixels = core::slice::from_raw_parts(input_ptr as *const u8, INPUT_SIZE);
        let class = predict(pixels);

        write_u32(output_ptr, class);
        write_u32(ctrl_base + CTRL_OUTPUT_LEN as u64, output_bytes as u32);
        write_u32(ctrl_base + CTRL_STATUS as u64, ERR_OK);
        sys_exit(ERR_OK);
    }
}
