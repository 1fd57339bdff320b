//! Slow Control Adapter (GBT-SCA) over a link.
//!
//! Commands are 32-bit words laid out as
//! `channel << 24 | transaction << 16 | length << 8 | command`, paired with a
//! 32-bit data word. Every command is checked against [`COMMAND_TABLE`] before
//! a register is touched.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{number_from_json, ScAdapter};
use crate::error::{AlfError, AlfResult};
use crate::hardware::{regs, CardId};
use crate::link::{LinkChannel, LinkRegistry, SessionId};
pub use crate::link::SvlState;
use crate::sequence::script::parse_hex;
use crate::sequence::{self, RenderStep, StepName, StepResult};

/// Low byte of a reply command while the SCA channel is still busy.
const CHANNEL_BUSY: u32 = 0x40;

const ERROR_FLAGS: [&str; 7] = [
    "generic error flag",
    "invalid channel request",
    "invalid command request",
    "invalid transaction number",
    "invalid length",
    "channel not enabled",
    "channel busy",
];

/// One accepted `(channel, command)` pair.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub first_channel: u32,
    pub last_channel: u32,
    pub command: u32,
    /// Largest data value the command accepts, if bounded.
    pub max_data: Option<u32>,
}

const fn on(channel: u32, command: u32) -> CommandSpec {
    CommandSpec {
        first_channel: channel,
        last_channel: channel,
        command,
        max_data: None,
    }
}

const fn i2c(command: u32) -> CommandSpec {
    CommandSpec {
        first_channel: 0x03,
        last_channel: 0x12,
        command,
        max_data: None,
    }
}

/// Commands the adapter will send.
pub const COMMAND_TABLE: &[CommandSpec] = &[
    // node controller
    on(0x00, 0x02),
    on(0x00, 0x03),
    on(0x00, 0x04),
    on(0x00, 0x05),
    on(0x00, 0x06),
    on(0x00, 0x07),
    on(0x00, 0xf0),
    on(0x00, 0xf1),
    // GPIO
    on(0x02, 0x01),
    on(0x02, 0x10),
    on(0x02, 0x11),
    on(0x02, 0x20),
    on(0x02, 0x21),
    // I2C masters 0-15
    i2c(0x11),
    i2c(0x30),
    i2c(0x31),
    i2c(0x82),
    i2c(0x86),
    i2c(0xda),
    i2c(0xde),
    // JTAG
    on(0x13, 0x80),
    on(0x13, 0x81),
    on(0x13, 0x90),
    on(0x13, 0x91),
    on(0x13, 0xa2),
    // ADC
    CommandSpec {
        first_channel: 0x14,
        last_channel: 0x14,
        command: 0x50,
        max_data: Some(31),
    },
    on(0x14, 0x51),
    on(0x14, 0x60),
    on(0x14, 0x61),
    on(0x14, 0x02),
    on(0x14, 0xd1),
    // DAC
    on(0x15, 0x10),
    on(0x15, 0x11),
    on(0x15, 0x20),
    on(0x15, 0x21),
];

/// A command word and its data word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandData {
    #[serde(deserialize_with = "number_from_json")]
    pub command: u32,
    #[serde(deserialize_with = "number_from_json")]
    pub data: u32,
}

impl CommandData {
    pub fn new(command: u32, data: u32) -> Self {
        Self { command, data }
    }

    pub fn channel(&self) -> u32 {
        self.command >> 24
    }

    pub fn transaction_id(&self) -> u32 {
        (self.command >> 16) & 0xff
    }

    pub fn length(&self) -> u32 {
        (self.command >> 8) & 0xff
    }

    pub fn code(&self) -> u32 {
        self.command & 0xff
    }

    /// Check the command against [`COMMAND_TABLE`].
    ///
    /// # Errors
    ///
    /// [`AlfError::Command`] if the transaction id is reserved, the
    /// `(channel, command)` pair is unknown, or the data is out of range.
    pub fn validate(&self) -> AlfResult<()> {
        let transaction = self.transaction_id();
        if transaction == 0x00 || transaction == 0xff {
            return Err(AlfError::Command(format!(
                "invalid transaction ID 0x{transaction:02x} in command 0x{:08x}",
                self.command
            )));
        }

        let channel = self.channel();
        let code = self.code();
        let entry = COMMAND_TABLE
            .iter()
            .find(|entry| {
                entry.command == code
                    && (entry.first_channel..=entry.last_channel).contains(&channel)
            })
            .ok_or_else(|| {
                AlfError::Command(format!(
                    "unknown command 0x{code:02x} on SCA channel 0x{channel:02x}"
                ))
            })?;

        if let Some(max) = entry.max_data {
            if self.data > max {
                return Err(AlfError::Command(format!(
                    "data 0x{:08x} out of range for command 0x{code:02x} (max 0x{max:x})",
                    self.data
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for CommandData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x},0x{:08x}", self.command, self.data)
    }
}

impl FromStr for CommandData {
    type Err = AlfError;

    /// Parse `<command>,<data>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (command, data) = s
            .split_once(',')
            .ok_or_else(|| AlfError::Parse(format!("expected \"command,data\", got \"{s}\"")))?;
        Ok(Self::new(parse_hex(command)?, parse_hex(data)?))
    }
}

/// One step of an SCA sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScaOp {
    Command(CommandData),
    Wait {
        #[serde(default)]
        ms: Option<u64>,
    },
    ScReset,
    SvlReset,
    SvlConnect,
}

impl ScaOp {
    pub fn command(command: u32, data: u32) -> Self {
        ScaOp::Command(CommandData::new(command, data))
    }

    pub fn wait(ms: u64) -> Self {
        ScaOp::Wait { ms: Some(ms) }
    }
}

impl StepName for ScaOp {
    fn name(&self) -> &'static str {
        match self {
            ScaOp::Command(_) => "command",
            ScaOp::Wait { .. } => "wait",
            ScaOp::ScReset => "sc_reset",
            ScaOp::SvlReset => "svl_reset",
            ScaOp::SvlConnect => "svl_connect",
        }
    }
}

impl fmt::Display for ScaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaOp::Command(command) => write!(
                f,
                "command cmd=0x{:08x} data=0x{:08x}",
                command.command, command.data
            ),
            ScaOp::Wait { ms: Some(ms) } => write!(f, "wait {ms}"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Result of one successful SCA step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum ScaOutput {
    /// Request command with the reply data.
    Command(CommandData),
    Wait(u64),
    ScReset,
    SvlReset,
    SvlConnect,
}

impl StepName for ScaOutput {
    fn name(&self) -> &'static str {
        match self {
            ScaOutput::Command(_) => "command",
            ScaOutput::Wait(_) => "wait",
            ScaOutput::ScReset => "sc_reset",
            ScaOutput::SvlReset => "svl_reset",
            ScaOutput::SvlConnect => "svl_connect",
        }
    }
}

impl RenderStep for ScaOutput {
    fn render(&self, out: &mut String) {
        match self {
            ScaOutput::Command(command) => {
                out.push_str(&command.to_string());
                out.push('\n');
            }
            ScaOutput::Wait(ms) => out.push_str(&format!("{ms}\n")),
            _ => {}
        }
    }
}

/// SCA adapter bound to one link.
#[derive(Debug)]
pub struct Sca {
    link: Arc<LinkChannel>,
    session: SessionId,
}

impl Sca {
    pub fn open(registry: &LinkRegistry, card: &CardId, link: u32) -> AlfResult<Self> {
        Ok(Self::from_link(registry.open(card, link)?))
    }

    pub fn from_link(link: Arc<LinkChannel>) -> Self {
        let session = SessionId::new();
        debug!(link = %link.key(), %session, "SCA session opened");
        Self { link, session }
    }

    /// Sub-link state of the link, shared with every other adapter on it.
    pub fn svl_state(&self) -> SvlState {
        self.link.svl_state()
    }

    /// Validate, send and execute one command, returning the request command
    /// with the reply data.
    ///
    /// # Errors
    ///
    /// - [`AlfError::Command`] if the command is rejected by validation; no register is touched
    /// - [`AlfError::Sca`] on a busy timeout or if the reply carries error flags
    pub async fn execute_command(&self, command: u32, data: u32) -> AlfResult<CommandData> {
        let request = CommandData::new(command, data);
        request.validate()?;

        self.wait_on_busy_clear().await?;
        self.link.write_register(regs::SCA_WR_DATA, data)?;
        self.link.write_register(regs::SCA_WR_CMD, command)?;
        self.link
            .write_register(regs::SCA_WR_CTRL, regs::SCA_CTRL_EXECUTE)?;
        self.link.write_register(regs::SCA_WR_CTRL, 0x0)?;
        self.wait_on_busy_clear().await?;

        let reply = self.read_reply().await?;
        trace!(link = %self.link.key(), channel = self.link.channel(), %request, reply = %reply, "SCA command");
        Ok(CommandData::new(command, reply.data))
    }

    /// [`execute_command`](Self::execute_command) while holding the link lock
    /// for this session.
    ///
    /// Fails with [`AlfError::LinkBusy`] without touching a register if another
    /// session holds the lock.
    pub async fn execute_command_locked(&self, command: u32, data: u32) -> AlfResult<CommandData> {
        let _guard = self.link.try_lock(self.session)?;
        self.execute_command(command, data).await
    }

    /// Pulse the sub-link reset. Valid from any state.
    pub fn svl_reset(&self) -> AlfResult<()> {
        self.link.write_register(regs::SVL_CTRL, regs::SVL_CMD_RESET)?;
        self.link.write_register(regs::SVL_CTRL, 0x0)?;
        self.link.set_svl_state(SvlState::Reset);
        debug!(link = %self.link.key(), "SVL reset");
        Ok(())
    }

    /// Connect the sub-link. A closed sub-link is reset first; an already
    /// connected one is left alone.
    pub fn svl_connect(&self) -> AlfResult<()> {
        match self.link.svl_state() {
            SvlState::Connected => return Ok(()),
            SvlState::Closed => self.svl_reset()?,
            SvlState::Reset => {}
        }
        self.link
            .write_register(regs::SVL_CTRL, regs::SVL_CMD_CONNECT)?;
        self.link.write_register(regs::SVL_CTRL, 0x0)?;
        self.link.set_svl_state(SvlState::Connected);
        debug!(link = %self.link.key(), "SVL connected");
        Ok(())
    }

    pub async fn sequence(
        &mut self,
        ops: &[ScaOp],
        lock: bool,
    ) -> AlfResult<Vec<StepResult<ScaOutput>>> {
        sequence::execute(self, ops, lock).await
    }

    async fn wait_on_busy_clear(&self) -> AlfResult<()> {
        let deadline = Instant::now() + self.link.timing().sca_busy_timeout();
        loop {
            let ctrl = self.link.read_register(regs::SCA_RD_CTRL)?;
            if !regs::bit(ctrl, regs::SCA_BUSY_BIT) {
                return Ok(());
            }
            self.pause_until(deadline)
                .await
                .ok_or_else(|| AlfError::Sca("Exceeded timeout on busy wait".to_string()))?;
        }
    }

    async fn read_reply(&self) -> AlfResult<CommandData> {
        let deadline = Instant::now() + self.link.timing().sca_channel_busy_timeout();
        loop {
            let data = self.link.read_register(regs::SCA_RD_DATA)?;
            let command = self.link.read_register(regs::SCA_RD_CMD)?;
            if command & 0xff != CHANNEL_BUSY {
                check_error(command)?;
                return Ok(CommandData::new(command, data));
            }
            self.pause_until(deadline).await.ok_or_else(|| {
                AlfError::Sca(format!(
                    "Exceeded timeout on channel busy wait, command: 0x{command:08x} data: 0x{data:08x}"
                ))
            })?;
        }
    }

    /// Sleep one poll interval, or return `None` once `deadline` has passed.
    async fn pause_until(&self, deadline: Instant) -> Option<()> {
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        let interval = self.link.timing().poll_interval();
        tokio::time::sleep(interval.min(deadline - now)).await;
        Some(())
    }
}

fn check_error(command: u32) -> AlfResult<()> {
    let code = command & 0xff;
    let reasons: Vec<&str> = (0..ERROR_FLAGS.len() as u32)
        .filter(|flag| regs::bit(code, *flag))
        .map(|flag| ERROR_FLAGS[flag as usize])
        .collect();
    if reasons.is_empty() {
        return Ok(());
    }
    Err(AlfError::Sca(format!(
        "error code 0x{code:02x}: {}",
        reasons.join(", ")
    )))
}

#[async_trait]
impl ScAdapter for Sca {
    type Op = ScaOp;
    type Output = ScaOutput;

    const PROTOCOL: &'static str = "SCA";

    fn link(&self) -> &Arc<LinkChannel> {
        &self.link
    }

    fn session(&self) -> SessionId {
        self.session
    }

    async fn sc_reset(&mut self) -> AlfResult<()> {
        self.link.sc_reset()
    }

    async fn dispatch(&mut self, op: &ScaOp) -> AlfResult<ScaOutput> {
        match op {
            ScaOp::Command(command) => {
                let reply = self.execute_command(command.command, command.data).await?;
                Ok(ScaOutput::Command(reply))
            }
            ScaOp::Wait { ms } => {
                let duration: Duration = ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.link.timing().default_wait());
                Ok(ScaOutput::Wait(sequence::pause(duration).await))
            }
            ScaOp::ScReset => {
                self.sc_reset().await?;
                Ok(ScaOutput::ScReset)
            }
            ScaOp::SvlReset => {
                self.svl_reset()?;
                Ok(ScaOutput::SvlReset)
            }
            ScaOp::SvlConnect => {
                self.svl_connect()?;
                Ok(ScaOutput::SvlConnect)
            }
        }
    }
}
