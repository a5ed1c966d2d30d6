//! Guest memory layout constants.

pub const CONTROL_OFFSET: usize = 0x0000;
pub const INPUT_MAX: usize = 4096;
pub const OUTPUT_MAX: usize = 256;

pub const SCRATCH_MIN: usize = 262_144;
pub const RESERVED_TAIL: usize = 32;
pub const STACK_GUARD: usize = 0x4000;
pub const STACK_PTR: usize = SCRATCH_MIN - RESERVED_TAIL - STACK_GUARD;
