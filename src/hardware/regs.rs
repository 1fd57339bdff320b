//! Slow-control register map of one link block.
//!
//! Offsets are relative to the link+channel address handed to the
//! [`Transport`](super::Transport); the transport resolves the absolute BAR index.

/// Global SC reset. Pulse 1 then 0.
pub const SC_RESET: u32 = 0x00;

pub const SWT_WR_WORD_L: u32 = 0x04;
pub const SWT_WR_WORD_M: u32 = 0x08;
pub const SWT_WR_WORD_H: u32 = 0x0c;
pub const SWT_RD_WORD_L: u32 = 0x10;
pub const SWT_RD_WORD_M: u32 = 0x14;
pub const SWT_RD_WORD_H: u32 = 0x18;
/// Bits 31..16 hold the number of words waiting in the read FIFO.
pub const SWT_MON: u32 = 0x1c;

pub const SCA_WR_DATA: u32 = 0x20;
pub const SCA_WR_CMD: u32 = 0x24;
pub const SCA_WR_CTRL: u32 = 0x28;
pub const SCA_RD_DATA: u32 = 0x2c;
pub const SCA_RD_CMD: u32 = 0x30;
/// Bit 31 is the busy flag.
pub const SCA_RD_CTRL: u32 = 0x34;
/// Sub-link control. 0x1 resets, 0x2 connects, 0x0 idles.
pub const SVL_CTRL: u32 = 0x38;

pub const IC_WR_DATA: u32 = 0x40;
pub const IC_WR_CMD: u32 = 0x44;
/// Bits 7..0 data, bit 16 FIFO empty, bit 31 ready.
pub const IC_RD_DATA: u32 = 0x48;
pub const IC_WR_CFG: u32 = 0x4c;

pub const SCA_CTRL_EXECUTE: u32 = 0x4;
pub const SCA_BUSY_BIT: u32 = 31;

pub const IC_CMD_PUSH: u32 = 0x1;
pub const IC_CMD_PULSE_READ: u32 = 0x2;
pub const IC_CMD_EXEC_WRITE: u32 = 0x4;
pub const IC_CMD_EXEC_READ: u32 = 0x8;
pub const IC_EMPTY_BIT: u32 = 16;
pub const IC_READY_BIT: u32 = 31;

pub const SVL_CMD_RESET: u32 = 0x1;
pub const SVL_CMD_CONNECT: u32 = 0x2;

/// Whether bit `index` of `value` is set.
pub fn bit(value: u32, index: u32) -> bool {
    (value >> index) & 0x1 == 1
}
