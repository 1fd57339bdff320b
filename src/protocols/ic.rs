//! IC adapter: addressed register access to the front-end GBT chip.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{number_from_json, ScAdapter};
use crate::error::{AlfError, AlfResult};
use crate::hardware::{regs, CardId};
use crate::link::{LinkChannel, LinkRegistry, SessionId};
use crate::sequence::{self, RenderStep, StepName, StepResult};

/// Configuration written to the IC block when a session opens or the link is reset.
pub const DEFAULT_GBT_I2C_CONFIG: u32 = 0x3;

const MAX_ADDRESS: u32 = 0xffff;
const MAX_DATA: u32 = 0xff;

/// One step of an IC sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IcOp {
    Write {
        #[serde(deserialize_with = "number_from_json")]
        address: u32,
        #[serde(deserialize_with = "number_from_json")]
        data: u32,
    },
    Read {
        #[serde(deserialize_with = "number_from_json")]
        address: u32,
    },
    Wait {
        #[serde(default)]
        ms: Option<u64>,
    },
    ScReset,
}

impl IcOp {
    pub fn write(address: u32, data: u32) -> Self {
        IcOp::Write { address, data }
    }

    pub fn read(address: u32) -> Self {
        IcOp::Read { address }
    }
}

impl StepName for IcOp {
    fn name(&self) -> &'static str {
        match self {
            IcOp::Write { .. } => "write",
            IcOp::Read { .. } => "read",
            IcOp::Wait { .. } => "wait",
            IcOp::ScReset => "sc_reset",
        }
    }
}

impl fmt::Display for IcOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcOp::Write { address, data } => {
                write!(f, "write address=0x{address:08x} data=0x{data:08x}")
            }
            IcOp::Read { address } => write!(f, "read address=0x{address:08x}"),
            IcOp::Wait { ms: Some(ms) } => write!(f, "wait {ms}"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Result of one successful IC step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IcOutput {
    /// `echo` is the data byte reported back by the write acknowledge.
    Write { address: u32, echo: u32 },
    Read { address: u32, data: u32 },
    Wait { ms: u64 },
    ScReset,
}

impl StepName for IcOutput {
    fn name(&self) -> &'static str {
        match self {
            IcOutput::Write { .. } => "write",
            IcOutput::Read { .. } => "read",
            IcOutput::Wait { .. } => "wait",
            IcOutput::ScReset => "sc_reset",
        }
    }
}

impl RenderStep for IcOutput {
    fn render(&self, out: &mut String) {
        match self {
            IcOutput::Write { echo: value, .. } | IcOutput::Read { data: value, .. } => {
                out.push_str(&format!("0x{value:08x}\n"));
            }
            IcOutput::Wait { ms } => out.push_str(&format!("{ms}\n")),
            IcOutput::ScReset => {}
        }
    }
}

/// IC adapter bound to one link.
#[derive(Debug)]
pub struct Ic {
    link: Arc<LinkChannel>,
    session: SessionId,
}

impl Ic {
    /// Bind a new IC session to `(card, link)` and write the default configuration.
    pub fn open(registry: &LinkRegistry, card: &CardId, link: u32) -> AlfResult<Self> {
        Self::from_link(registry.open(card, link)?)
    }

    pub fn from_link(link: Arc<LinkChannel>) -> AlfResult<Self> {
        let ic = Self {
            link,
            session: SessionId::new(),
        };
        ic.write_gbt_i2c(DEFAULT_GBT_I2C_CONFIG)?;
        debug!(link = %ic.link.key(), session = %ic.session, "IC session opened");
        Ok(ic)
    }

    /// Store `data` at `address`. Returns the data byte of the acknowledge.
    ///
    /// Only the low 16 bits of the address and the low 8 bits of the data
    /// reach the front-end.
    ///
    /// # Errors
    ///
    /// [`AlfError::Ic`] if the front-end did not acknowledge the write.
    pub async fn write(&self, address: u32, data: u32) -> AlfResult<u32> {
        let address = address & MAX_ADDRESS;
        let data = data & MAX_DATA;

        self.link
            .write_register(regs::IC_WR_DATA, (data << 16) | address)?;
        self.command(regs::IC_CMD_PUSH)?;
        self.command(regs::IC_CMD_EXEC_WRITE)?;

        let settle = self.link.timing().ic_write_settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let status = self.link.read_register(regs::IC_RD_DATA)?;
        if regs::bit(status, regs::IC_EMPTY_BIT) || !regs::bit(status, regs::IC_READY_BIT) {
            return Err(AlfError::Ic("IC write was unsuccessful".to_string()));
        }
        trace!(link = %self.link.key(), channel = self.link.channel(), address, data, "IC write");
        Ok(status & MAX_DATA)
    }

    /// Read the byte at `address`, truncated to 16 bits.
    pub fn read(&self, address: u32) -> AlfResult<u32> {
        let address = address & MAX_ADDRESS;

        self.link.write_register(regs::IC_WR_DATA, address)?;
        self.command(regs::IC_CMD_PUSH)?;
        self.command(regs::IC_CMD_EXEC_READ)?;
        self.command(regs::IC_CMD_PULSE_READ)?;

        let data = self.link.read_register(regs::IC_RD_DATA)? & MAX_DATA;
        trace!(link = %self.link.key(), channel = self.link.channel(), address, data, "IC read");
        Ok(data)
    }

    /// Write the IC configuration register.
    pub fn write_gbt_i2c(&self, config: u32) -> AlfResult<()> {
        self.link.write_register(regs::IC_WR_CFG, config)
    }

    pub async fn sequence(
        &mut self,
        ops: &[IcOp],
        lock: bool,
    ) -> AlfResult<Vec<StepResult<IcOutput>>> {
        sequence::execute(self, ops, lock).await
    }

    /// Pulse one command bit of the IC state machine.
    fn command(&self, bit: u32) -> AlfResult<()> {
        self.link.write_register(regs::IC_WR_CMD, bit)?;
        self.link.write_register(regs::IC_WR_CMD, 0x0)
    }
}

#[async_trait]
impl ScAdapter for Ic {
    type Op = IcOp;
    type Output = IcOutput;

    const PROTOCOL: &'static str = "IC";

    fn link(&self) -> &Arc<LinkChannel> {
        &self.link
    }

    fn session(&self) -> SessionId {
        self.session
    }

    async fn sc_reset(&mut self) -> AlfResult<()> {
        self.link.sc_reset()?;
        self.write_gbt_i2c(DEFAULT_GBT_I2C_CONFIG)
    }

    async fn dispatch(&mut self, op: &IcOp) -> AlfResult<IcOutput> {
        match *op {
            IcOp::Write { address, data } => Ok(IcOutput::Write {
                address,
                echo: self.write(address, data).await?,
            }),
            IcOp::Read { address } => Ok(IcOutput::Read {
                address,
                data: self.read(address)?,
            }),
            IcOp::Wait { ms } => {
                let duration = ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.link.timing().default_wait());
                Ok(IcOutput::Wait {
                    ms: sequence::pause(duration).await,
                })
            }
            IcOp::ScReset => {
                self.sc_reset().await?;
                Ok(IcOutput::ScReset)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::hardware::{LinkAddress, MockBar, StaticTopology, Transport};

    fn setup() -> (Arc<MockBar>, LinkRegistry) {
        let bar = Arc::new(MockBar::new());
        let topology = StaticTopology::new().with_card("#1", 12, 12);
        let timing = TimingConfig {
            ic_write_settle_ms: 0,
            ..TimingConfig::default()
        };
        let registry = LinkRegistry::new(Arc::new(topology), bar.clone(), timing);
        (bar, registry)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_bar, registry) = setup();
        let ic = Ic::open(&registry, &CardId::from("#1"), 0).unwrap();
        assert_eq!(ic.write(0xbb, 0xdd).await.unwrap(), 0xdd);
        assert_eq!(ic.read(0xbb).unwrap(), 0xdd);
    }

    #[tokio::test]
    async fn test_reset_restores_default() {
        let (_bar, registry) = setup();
        let mut ic = Ic::open(&registry, &CardId::from("#1"), 0).unwrap();
        ic.write(0xbb, 0xdd).await.unwrap();
        ic.sc_reset().await.unwrap();
        let value = ic.read(0xbb).unwrap();
        assert_ne!(value, 0xdd);
        assert_eq!(value, crate::hardware::mock::IC_DEFAULT_VALUE);
    }

    #[tokio::test]
    async fn test_config_written_on_open_and_reset() {
        let (bar, registry) = setup();
        let card = CardId::from("#1");
        let mut ic = Ic::open(&registry, &card, 2).unwrap();
        let addr = LinkAddress { link: 2, channel: 0 };
        assert_eq!(bar.read_register(&card, addr, regs::IC_WR_CFG).unwrap(), 0x3);

        ic.write_gbt_i2c(0x7).unwrap();
        ic.sc_reset().await.unwrap();
        assert_eq!(bar.read_register(&card, addr, regs::IC_WR_CFG).unwrap(), 0x3);
    }

    #[tokio::test]
    async fn test_wide_values_are_truncated() {
        let (_bar, registry) = setup();
        let ic = Ic::open(&registry, &CardId::from("#1"), 0).unwrap();
        ic.write(0xbb, 0xdd).await.unwrap();
        assert_eq!(ic.read(0x1_00bb).unwrap(), 0xdd);

        assert_eq!(ic.write(0x2_00cc, 0x1ee).await.unwrap(), 0xee);
        assert_eq!(ic.read(0xcc).unwrap(), 0xee);
    }

    #[tokio::test]
    async fn test_unacknowledged_write() {
        let (bar, registry) = setup();
        let ic = Ic::open(&registry, &CardId::from("#1"), 0).unwrap();
        bar.drop_ic_acks(true);
        let err = ic.write(0xbb, 0xdd).await.unwrap_err();
        assert_eq!(err.to_string(), "IC error: IC write was unsuccessful");
    }

    #[tokio::test]
    async fn test_sequence_render() {
        let (_bar, registry) = setup();
        let mut ic = Ic::open(&registry, &CardId::from("#1"), 0).unwrap();
        let ops = [IcOp::write(0xbb, 0xdd), IcOp::read(0xbb), IcOp::ScReset, IcOp::read(0xbb)];
        let results = ic.sequence(&ops, true).await.unwrap();
        let text = sequence::render(&results).unwrap();
        assert_eq!(text, "0x000000dd\n0x000000dd\n0x00000000\n");
        assert!(!ic.link().is_locked());
    }

    #[test]
    fn test_op_json() {
        let op: IcOp = serde_json::from_str(r#"{"op":"write","address":"0xbb","data":221}"#).unwrap();
        assert_eq!(op, IcOp::write(0xbb, 0xdd));
        assert!(serde_json::from_str::<IcOp>(r#"{"op":"read"}"#).is_err());
    }
}
