//! Mock Hardware Implementation
//!
//! `MockBar` emulates the slow-control register block of a card so that the
//! adapters and the sequence engine can run without hardware.
//!
//! # Behaviour
//!
//! - SWT: a word written through `SWT_WR_WORD_*` loops back into the read FIFO of
//!   the same link and channel.
//! - SCA: commands with an even command code store their data, odd codes read
//!   back what the matching even code stored. Replies can be forced to carry
//!   error flags, and the busy flag can be held high.
//! - IC: a register file per link and channel, every register defaulting to `0x00`.
//!   Write acknowledges can be suppressed.
//! - `SC_RESET` (rising edge) wipes every channel of the link.
//!
//! Register access counters let tests check that a rejected call never reached
//! the hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::regs;
use super::{CardId, LinkAddress, Transport};
use crate::error::{AlfError, AlfResult};

/// Value every IC register holds after power-on or reset.
pub const IC_DEFAULT_VALUE: u32 = 0x00;

#[derive(Debug, Default, Clone, Copy)]
struct RawSwtWord {
    low: u32,
    med: u32,
    high: u32,
}

#[derive(Debug, Default)]
struct ChannelState {
    swt_write_med: u32,
    swt_write_high: u32,
    swt_fifo: VecDeque<RawSwtWord>,
    swt_latched: RawSwtWord,

    sca_wr_data: u32,
    sca_wr_cmd: u32,
    sca_rd_data: u32,
    sca_rd_cmd: u32,
    sca_store: HashMap<(u32, u32), u32>,

    ic_wr_data: u32,
    ic_fifo: Option<u32>,
    ic_pending_read: u32,
    ic_rd_data: u32,
    ic_cfg: u32,
    ic_registers: HashMap<u32, u32>,
}

#[derive(Debug, Default)]
struct BarState {
    channels: HashMap<(CardId, LinkAddress), ChannelState>,
    svl_commands: HashMap<(CardId, u32), Vec<u32>>,
    resets: HashMap<(CardId, u32), u64>,
}

/// Loopback emulator of a card's slow-control registers.
#[derive(Debug, Default)]
pub struct MockBar {
    state: Mutex<BarState>,
    reads: AtomicU64,
    writes: AtomicU64,
    sca_hold_busy: AtomicBool,
    sca_reply_flags: AtomicU64,
    ic_drop_ack: AtomicBool,
}

impl MockBar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of register writes seen so far.
    pub fn register_writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Total number of register reads seen so far.
    pub fn register_reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Words currently waiting in the SWT read FIFO of `addr`.
    pub fn swt_pending(&self, card: &CardId, addr: LinkAddress) -> usize {
        self.lock()
            .ok()
            .and_then(|state| {
                state
                    .channels
                    .get(&(card.clone(), addr))
                    .map(|channel| channel.swt_fifo.len())
            })
            .unwrap_or(0)
    }

    /// Number of SC reset edges seen on `link`.
    pub fn reset_count(&self, card: &CardId, link: u32) -> u64 {
        self.lock()
            .ok()
            .and_then(|state| state.resets.get(&(card.clone(), link)).copied())
            .unwrap_or(0)
    }

    /// Non-idle values written to the sub-link control register of `link`.
    pub fn svl_commands(&self, card: &CardId, link: u32) -> Vec<u32> {
        self.lock()
            .ok()
            .and_then(|state| state.svl_commands.get(&(card.clone(), link)).cloned())
            .unwrap_or_default()
    }

    /// Hold the SCA busy flag high.
    pub fn hold_sca_busy(&self, busy: bool) {
        self.sca_hold_busy.store(busy, Ordering::SeqCst);
    }

    /// Force every SCA reply to carry `flags` in its error byte.
    pub fn set_sca_reply_flags(&self, flags: u8) {
        self.sca_reply_flags.store(u64::from(flags), Ordering::SeqCst);
    }

    /// Suppress the acknowledge of IC writes.
    pub fn drop_ic_acks(&self, drop: bool) {
        self.ic_drop_ack.store(drop, Ordering::SeqCst);
    }

    fn lock(&self) -> AlfResult<MutexGuard<'_, BarState>> {
        self.state
            .lock()
            .map_err(|_| AlfError::Transport("mock register state poisoned".to_string()))
    }

    fn execute_sca(&self, channel: &mut ChannelState) {
        let command = channel.sca_wr_cmd;
        let flags = self.sca_reply_flags.load(Ordering::SeqCst) as u32;
        channel.sca_rd_cmd = (command & 0xffff_ff00) | (flags & 0xff);
        if flags != 0 {
            channel.sca_rd_data = 0;
            return;
        }

        let sca_channel = command >> 24;
        let code = command & 0xff;
        if code % 2 == 0 {
            channel
                .sca_store
                .insert((sca_channel, code | 0x1), channel.sca_wr_data);
            channel.sca_rd_data = channel.sca_wr_data;
        } else {
            channel.sca_rd_data = channel
                .sca_store
                .get(&(sca_channel, code))
                .copied()
                .unwrap_or(0);
        }
    }

    fn execute_ic(&self, channel: &mut ChannelState, command: u32) {
        match command {
            regs::IC_CMD_PUSH => channel.ic_fifo = Some(channel.ic_wr_data),
            regs::IC_CMD_EXEC_WRITE => {
                let Some(entry) = channel.ic_fifo.take() else {
                    channel.ic_rd_data = 1 << regs::IC_EMPTY_BIT;
                    return;
                };
                if self.ic_drop_ack.load(Ordering::SeqCst) {
                    channel.ic_rd_data = 1 << regs::IC_EMPTY_BIT;
                    return;
                }
                let address = entry & 0xffff;
                let data = (entry >> 16) & 0xff;
                channel.ic_registers.insert(address, data);
                channel.ic_rd_data = (1 << regs::IC_READY_BIT) | data;
            }
            regs::IC_CMD_EXEC_READ => {
                let address = channel.ic_fifo.take().unwrap_or(0) & 0xffff;
                channel.ic_pending_read = channel
                    .ic_registers
                    .get(&address)
                    .copied()
                    .unwrap_or(IC_DEFAULT_VALUE);
            }
            regs::IC_CMD_PULSE_READ => {
                channel.ic_rd_data = (1 << regs::IC_READY_BIT) | (channel.ic_pending_read & 0xff);
            }
            _ => {}
        }
    }
}

fn unmapped(reg: u32) -> AlfError {
    AlfError::Transport(format!("unmapped register 0x{reg:02x}"))
}

impl Transport for MockBar {
    fn read_register(&self, card: &CardId, addr: LinkAddress, reg: u32) -> AlfResult<u32> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock()?;
        let channel = state.channels.entry((card.clone(), addr)).or_default();

        let value = match reg {
            regs::SWT_MON => {
                let words = channel.swt_fifo.len().min(0xffff) as u32;
                (words << 16) | ((addr.channel & 0xff) << 8)
            }
            regs::SWT_RD_WORD_L => {
                channel.swt_latched = channel.swt_fifo.pop_front().unwrap_or_default();
                channel.swt_latched.low
            }
            regs::SWT_RD_WORD_M => channel.swt_latched.med,
            regs::SWT_RD_WORD_H => channel.swt_latched.high,
            regs::SCA_RD_CTRL => {
                if self.sca_hold_busy.load(Ordering::SeqCst) {
                    1 << regs::SCA_BUSY_BIT
                } else {
                    0
                }
            }
            regs::SCA_RD_DATA => channel.sca_rd_data,
            regs::SCA_RD_CMD => channel.sca_rd_cmd,
            regs::IC_RD_DATA => channel.ic_rd_data,
            regs::IC_WR_CFG => channel.ic_cfg,
            other => return Err(unmapped(other)),
        };
        Ok(value)
    }

    fn write_register(
        &self,
        card: &CardId,
        addr: LinkAddress,
        reg: u32,
        value: u32,
    ) -> AlfResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock()?;

        match reg {
            regs::SC_RESET => {
                if value & 0x1 == 1 {
                    state
                        .channels
                        .retain(|(c, a), _| !(c == card && a.link == addr.link));
                    *state.resets.entry((card.clone(), addr.link)).or_default() += 1;
                }
                return Ok(());
            }
            regs::SVL_CTRL => {
                if value != 0 {
                    state
                        .svl_commands
                        .entry((card.clone(), addr.link))
                        .or_default()
                        .push(value);
                }
                return Ok(());
            }
            _ => {}
        }

        let channel = state.channels.entry((card.clone(), addr)).or_default();
        match reg {
            regs::SWT_WR_WORD_H => channel.swt_write_high = value & 0xfff,
            regs::SWT_WR_WORD_M => channel.swt_write_med = value,
            regs::SWT_WR_WORD_L => {
                let word = RawSwtWord {
                    low: value,
                    med: channel.swt_write_med,
                    high: channel.swt_write_high,
                };
                channel.swt_fifo.push_back(word);
                channel.swt_write_med = 0;
                channel.swt_write_high = 0;
            }
            regs::SCA_WR_DATA => channel.sca_wr_data = value,
            regs::SCA_WR_CMD => channel.sca_wr_cmd = value,
            regs::SCA_WR_CTRL => {
                if value == regs::SCA_CTRL_EXECUTE {
                    self.execute_sca(channel);
                }
            }
            regs::IC_WR_DATA => channel.ic_wr_data = value,
            regs::IC_WR_CMD => self.execute_ic(channel, value),
            regs::IC_WR_CFG => channel.ic_cfg = value,
            other => return Err(unmapped(other)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(link: u32, channel: u32) -> LinkAddress {
        LinkAddress { link, channel }
    }

    #[test]
    fn test_swt_loopback_and_reset() {
        let bar = MockBar::new();
        let card = CardId::from("#1");
        bar.write_register(&card, addr(0, 0), regs::SWT_WR_WORD_L, 0xdd)
            .unwrap();
        assert_eq!(bar.swt_pending(&card, addr(0, 0)), 1);
        assert_eq!(bar.swt_pending(&card, addr(0, 1)), 0);

        let mon = bar.read_register(&card, addr(0, 0), regs::SWT_MON).unwrap();
        assert_eq!(mon >> 16, 1);

        bar.write_register(&card, addr(0, 3), regs::SC_RESET, 1)
            .unwrap();
        bar.write_register(&card, addr(0, 3), regs::SC_RESET, 0)
            .unwrap();
        assert_eq!(bar.swt_pending(&card, addr(0, 0)), 0);
        assert_eq!(bar.reset_count(&card, 0), 1);
    }

    #[test]
    fn test_reset_leaves_other_links_alone() {
        let bar = MockBar::new();
        let card = CardId::from("#1");
        bar.write_register(&card, addr(1, 0), regs::SWT_WR_WORD_L, 1)
            .unwrap();
        bar.write_register(&card, addr(0, 0), regs::SC_RESET, 1)
            .unwrap();
        assert_eq!(bar.swt_pending(&card, addr(1, 0)), 1);
    }

    #[test]
    fn test_unmapped_register() {
        let bar = MockBar::new();
        let result = bar.read_register(&CardId::from("#1"), addr(0, 0), 0xfc);
        assert!(matches!(result, Err(AlfError::Transport(_))));
    }

    #[test]
    fn test_counters() {
        let bar = MockBar::new();
        let card = CardId::from("#1");
        bar.write_register(&card, addr(0, 0), regs::IC_WR_CFG, 3)
            .unwrap();
        assert_eq!(
            bar.read_register(&card, addr(0, 0), regs::IC_WR_CFG).unwrap(),
            3
        );
        assert_eq!(bar.register_writes(), 1);
        assert_eq!(bar.register_reads(), 1);
    }
}
