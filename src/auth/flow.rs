//! The single in-flight authorization attempt.

use std::fmt;

use crate::error::{AuthError, Result};
use crate::provider::ProviderId;

/// PKCE and CSRF context of one authorization attempt. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct FlowState {
    pub id: u64,
    pub provider: ProviderId,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
}

impl fmt::Debug for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowState")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("state", &"<redacted>")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}

/// Process-wide slot holding at most one flow.
#[derive(Debug, Default)]
pub enum FlowSlot {
    #[default]
    Idle,
    Active(FlowState),
}

impl FlowSlot {
    /// Claim the slot. Fails if another flow holds it.
    pub fn begin(&mut self, flow: FlowState) -> Result<()> {
        match self {
            FlowSlot::Active(current) => Err(AuthError::FlowInProgress(current.provider)),
            FlowSlot::Idle => {
                *self = FlowSlot::Active(flow);
                Ok(())
            }
        }
    }

    /// Release the slot if it still belongs to flow `id`.
    pub fn end(&mut self, id: u64) -> bool {
        match self {
            FlowSlot::Active(current) if current.id == id => {
                *self = FlowSlot::Idle;
                true
            }
            _ => false,
        }
    }

    /// Release the slot unconditionally.
    pub fn clear(&mut self) -> Option<FlowState> {
        match std::mem::take(self) {
            FlowSlot::Active(flow) => Some(flow),
            FlowSlot::Idle => None,
        }
    }

    pub fn active_provider(&self) -> Option<ProviderId> {
        match self {
            FlowSlot::Active(flow) => Some(flow.provider),
            FlowSlot::Idle => None,
        }
    }
}
