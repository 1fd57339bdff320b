//! Protocol adapters: SWT, SCA and IC.
//!
//! Every adapter is bound to one shared [`LinkChannel`] and is one session for
//! the link lock. They share a lifecycle (open, `set_channel`, `sc_reset`,
//! `sequence`) and differ in their primitives. The [`ScAdapter`] trait is the
//! seam the sequence engine uses to dispatch one step at a time.

pub mod ic;
pub mod sca;
pub mod swt;
pub mod swt_word;

pub use ic::{Ic, IcOp, IcOutput};
pub use sca::{CommandData, Sca, ScaOp, ScaOutput, SvlState};
pub use swt::{Swt, SwtOp, SwtOutput};
pub use swt_word::{SwtWord, SwtWordSize};

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use crate::error::AlfResult;
use crate::link::{LinkChannel, SessionId};
use crate::sequence::script::parse_number;
use crate::sequence::StepName;

/// Capabilities shared by the three protocol adapters.
#[async_trait]
pub trait ScAdapter: Send {
    /// One sequence operation of this protocol.
    type Op: StepName + Display + Send + Sync;
    /// Value produced by a successful operation.
    type Output: StepName + Send;

    /// Protocol tag used in logs and step error messages (`"SWT"`, ...).
    const PROTOCOL: &'static str;

    /// Link channel this adapter is bound to.
    fn link(&self) -> &Arc<LinkChannel>;

    /// Session identity used for the link lock.
    fn session(&self) -> SessionId;

    /// Select the channel of the shared link.
    fn set_channel(&self, channel: u32) -> AlfResult<()> {
        self.link().set_channel(channel)
    }

    /// Bring the link and this adapter's state back to RESET.
    async fn sc_reset(&mut self) -> AlfResult<()>;

    /// Run one operation.
    async fn dispatch(&mut self, op: &Self::Op) -> AlfResult<Self::Output>;
}

/// Accept a JSON number or a `0x`-prefixed / decimal string.
pub(crate) fn number_from_json<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    let value = match Repr::deserialize(deserializer)? {
        Repr::Number(value) => value,
        Repr::Text(text) => parse_number(&text).map_err(serde::de::Error::custom)?,
    };
    T::try_from(value).map_err(|_| serde::de::Error::custom(format!("value {value:#x} too wide")))
}
