//! Core library for the rust_alf link control plane.
//!
//! Protocol adapters for the SWT, SCA and IC front-end interfaces of a readout
//! card, bound to shared link channels and driven either one primitive at a
//! time or through the shared sequence engine. The register transport and the
//! card topology are injected; [`hardware::MockBar`] provides a loopback
//! transport for tests and the command-line tool.

pub mod config;
pub mod error;
pub mod hardware;
pub mod link;
pub mod logging;
pub mod protocols;
pub mod sequence;

/// Commonly used types, for `use rust_alf::prelude::*`.
pub mod prelude {
    pub use crate::config::AlfConfig;
    pub use crate::error::{AlfError, AlfResult};
    pub use crate::hardware::{CardId, MockBar, StaticTopology, Topology, Transport};
    pub use crate::link::{LinkChannel, LinkRegistry, SessionId};
    pub use crate::protocols::{
        CommandData, Ic, IcOp, IcOutput, ScAdapter, Sca, ScaOp, ScaOutput, SvlState, Swt, SwtOp,
        SwtOutput, SwtWord, SwtWordSize,
    };
    pub use crate::sequence::{StepName, StepResult};
}
