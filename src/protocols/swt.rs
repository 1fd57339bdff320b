//! Single Word Transfer adapter.
//!
//! Words written to a link are queued by the card; words coming back from the
//! front-end collect in a per-channel read FIFO whose fill level is reported
//! by the monitor register. Reads poll that level until data is present or a
//! wall-clock deadline passes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::swt_word::{SwtWord, SwtWordSize};
use super::ScAdapter;
use crate::error::{AlfError, AlfResult};
use crate::hardware::{regs, CardId};
use crate::link::{LinkChannel, LinkRegistry, SessionId};
use crate::sequence::{self, RenderStep, StepName, StepResult};

/// One step of an SWT sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SwtOp {
    /// Write one word.
    Write {
        #[serde(serialize_with = "word_to_text", deserialize_with = "word_from_json")]
        value: SwtWord,
    },
    /// Drain the read FIFO, waiting up to `timeout_ms` for the first word.
    Read {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// Pause this session.
    Wait {
        #[serde(default)]
        ms: Option<u64>,
    },
    ScReset,
}

impl SwtOp {
    pub fn write(value: u64) -> Self {
        SwtOp::Write {
            value: SwtWord::from(value),
        }
    }

    pub fn read(timeout_ms: u64) -> Self {
        SwtOp::Read {
            timeout_ms: Some(timeout_ms),
        }
    }

    pub fn wait(ms: u64) -> Self {
        SwtOp::Wait { ms: Some(ms) }
    }
}

impl StepName for SwtOp {
    fn name(&self) -> &'static str {
        match self {
            SwtOp::Write { .. } => "write",
            SwtOp::Read { .. } => "read",
            SwtOp::Wait { .. } => "wait",
            SwtOp::ScReset => "sc_reset",
        }
    }
}

impl fmt::Display for SwtOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwtOp::Write { value } => write!(f, "write {value}"),
            SwtOp::Read {
                timeout_ms: Some(ms),
            } => write!(f, "read {ms}"),
            SwtOp::Wait { ms: Some(ms) } => write!(f, "wait {ms}"),
            other => write!(f, "{}", other.name()),
        }
    }
}

fn word_to_text<S: Serializer>(word: &SwtWord, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(word)
}

fn word_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SwtWord, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(value) => Ok(SwtWord::from(value)),
        Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

/// Result of one successful SWT step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum SwtOutput {
    Write(SwtWord),
    /// Every word drained by the step, oldest first.
    Read(Vec<SwtWord>),
    Wait(u64),
    ScReset,
}

impl SwtOutput {
    /// Words carried by a read result.
    pub fn words(&self) -> &[SwtWord] {
        match self {
            SwtOutput::Read(words) => words,
            _ => &[],
        }
    }
}

impl StepName for SwtOutput {
    fn name(&self) -> &'static str {
        match self {
            SwtOutput::Write(_) => "write",
            SwtOutput::Read(_) => "read",
            SwtOutput::Wait(_) => "wait",
            SwtOutput::ScReset => "sc_reset",
        }
    }
}

impl RenderStep for SwtOutput {
    fn render(&self, out: &mut String) {
        match self {
            SwtOutput::Write(_) => out.push_str("0\n"),
            SwtOutput::Read(words) => {
                for word in words {
                    out.push_str(&word.to_string());
                    out.push('\n');
                }
            }
            SwtOutput::Wait(ms) => out.push_str(&format!("{ms}\n")),
            SwtOutput::ScReset => {}
        }
    }
}

/// Expand multi-word read results into one `read` entry per word.
///
/// Other results are kept as they are, in order.
pub fn split_reads(results: &[StepResult<SwtOutput>]) -> Vec<StepResult<SwtOutput>> {
    let mut expanded = Vec::with_capacity(results.len());
    for result in results {
        match result {
            StepResult::Done(SwtOutput::Read(words)) => expanded.extend(
                words
                    .iter()
                    .map(|word| StepResult::Done(SwtOutput::Read(vec![*word]))),
            ),
            other => expanded.push(other.clone()),
        }
    }
    expanded
}

/// SWT adapter bound to one link.
#[derive(Debug)]
pub struct Swt {
    link: Arc<LinkChannel>,
    session: SessionId,
    word_size: SwtWordSize,
}

impl Swt {
    /// Bind a new SWT session to `(card, link)` with low-size words.
    pub fn open(registry: &LinkRegistry, card: &CardId, link: u32) -> AlfResult<Self> {
        Self::open_with_size(registry, card, link, SwtWordSize::default())
    }

    pub fn open_with_size(
        registry: &LinkRegistry,
        card: &CardId,
        link: u32,
        word_size: SwtWordSize,
    ) -> AlfResult<Self> {
        let link = registry.open(card, link)?;
        Ok(Self::from_link(link, word_size))
    }

    pub fn from_link(link: Arc<LinkChannel>, word_size: SwtWordSize) -> Self {
        let session = SessionId::new();
        debug!(link = %link.key(), %session, ?word_size, "SWT session opened");
        Self {
            link,
            session,
            word_size,
        }
    }

    pub fn word_size(&self) -> SwtWordSize {
        self.word_size
    }

    pub fn set_word_size(&mut self, word_size: SwtWordSize) {
        self.word_size = word_size;
    }

    /// Write `value` using this adapter's word size.
    pub fn write(&self, value: u64) -> AlfResult<()> {
        self.write_word(SwtWord::from(value).with_size(self.word_size))
    }

    /// Write `word`; the low part is written last and triggers the transfer.
    pub fn write_word(&self, word: SwtWord) -> AlfResult<()> {
        if word.size() == SwtWordSize::High {
            self.link
                .write_register(regs::SWT_WR_WORD_H, u32::from(word.high()))?;
        }
        if matches!(word.size(), SwtWordSize::High | SwtWordSize::Medium) {
            self.link.write_register(regs::SWT_WR_WORD_M, word.med())?;
        }
        self.link.write_register(regs::SWT_WR_WORD_L, word.low())?;
        trace!(link = %self.link.key(), channel = self.link.channel(), %word, "SWT write");
        Ok(())
    }

    /// Pop one word from the read FIFO.
    ///
    /// With a zero `timeout` an empty FIFO fails at once with [`AlfError::NoData`].
    /// Otherwise the FIFO is polled until a word arrives; if none does,
    /// [`AlfError::Timeout`] is returned no earlier than `timeout` after the call.
    pub async fn read(&self, timeout: Duration) -> AlfResult<SwtWord> {
        self.wait_for_words(timeout).await?;
        self.pop_word()
    }

    /// Wait like [`Swt::read`], then drain every word in the read FIFO.
    pub async fn read_all(&self, timeout: Duration) -> AlfResult<Vec<SwtWord>> {
        let available = self.wait_for_words(timeout).await?;
        let mut words = Vec::with_capacity(available as usize);
        for _ in 0..available {
            words.push(self.pop_word()?);
        }
        Ok(words)
    }

    /// Number of words waiting in the read FIFO of the selected channel.
    pub fn pending(&self) -> AlfResult<u32> {
        Ok(self.link.read_register(regs::SWT_MON)? >> 16)
    }

    pub async fn sequence(
        &mut self,
        ops: &[SwtOp],
        lock: bool,
    ) -> AlfResult<Vec<StepResult<SwtOutput>>> {
        sequence::execute(self, ops, lock).await
    }

    async fn wait_for_words(&self, timeout: Duration) -> AlfResult<u32> {
        let start = Instant::now();
        let deadline = start + timeout;
        let poll_interval = self.link.timing().poll_interval();

        loop {
            let available = self.pending()?;
            if available > 0 {
                return Ok(available);
            }
            if timeout.is_zero() {
                return Err(AlfError::NoData);
            }

            let now = Instant::now();
            if now >= deadline {
                let elapsed = now - start;
                debug!(link = %self.link.key(), ?elapsed, ?timeout, "SWT read timed out");
                return Err(AlfError::Timeout { elapsed, timeout });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    fn pop_word(&self) -> AlfResult<SwtWord> {
        // reading the low part pops the FIFO and latches the other parts
        let low = self.link.read_register(regs::SWT_RD_WORD_L)?;
        let mut word = SwtWord::new(low, 0, 0, self.word_size);
        if matches!(self.word_size, SwtWordSize::High | SwtWordSize::Medium) {
            word.set_med(self.link.read_register(regs::SWT_RD_WORD_M)?);
        }
        if self.word_size == SwtWordSize::High {
            word.set_high(self.link.read_register(regs::SWT_RD_WORD_H)? as u16);
        }
        trace!(link = %self.link.key(), channel = self.link.channel(), %word, "SWT read");
        Ok(word)
    }
}

#[async_trait]
impl ScAdapter for Swt {
    type Op = SwtOp;
    type Output = SwtOutput;

    const PROTOCOL: &'static str = "SWT";

    fn link(&self) -> &Arc<LinkChannel> {
        &self.link
    }

    fn session(&self) -> SessionId {
        self.session
    }

    async fn sc_reset(&mut self) -> AlfResult<()> {
        self.link.sc_reset()
    }

    async fn dispatch(&mut self, op: &SwtOp) -> AlfResult<SwtOutput> {
        match op {
            SwtOp::Write { value } => {
                let word = value.with_size(self.word_size);
                self.write_word(word)?;
                Ok(SwtOutput::Write(word))
            }
            SwtOp::Read { timeout_ms } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.link.timing().swt_read_timeout());
                Ok(SwtOutput::Read(self.read_all(timeout).await?))
            }
            SwtOp::Wait { ms } => {
                let duration = ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.link.timing().default_wait());
                Ok(SwtOutput::Wait(sequence::pause(duration).await))
            }
            SwtOp::ScReset => {
                self.sc_reset().await?;
                Ok(SwtOutput::ScReset)
            }
        }
    }
}
