use thiserror::Error;

use crate::domain::{ConnectionState, ConnectionStatus, TimestampMs};
use crate::errors::StructuredError;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    Begin { retrying: bool, force: bool },
    Succeed {
        account: String,
        chain_id: String,
        at: Option<TimestampMs>,
    },
    Fail { error: StructuredError },
    AccountChanged { account: String },
    ChainChanged { chain_id: String },
    Reset,
}

impl ConnectionAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin { retrying: true, .. } => "retry",
            Self::Begin { .. } => "begin",
            Self::Succeed { .. } => "succeed",
            Self::Fail { .. } => "fail",
            Self::AccountChanged { .. } => "account_changed",
            Self::ChainChanged { .. } => "chain_changed",
            Self::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    pub reason: &'static str,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal connection transition: {from:?} on {action}")]
pub struct TransitionError {
    pub from: ConnectionStatus,
    pub action: &'static str,
}

/// Computes the next state as a whole. Callers swap it in under one lock so no
/// reader ever observes a half-applied update.
pub fn connection_transition(
    state: &ConnectionState,
    action: ConnectionAction,
) -> Result<(ConnectionState, StateTransition), TransitionError> {
    use ConnectionStatus::*;

    let from = state.status;
    let reason = action.name();
    let illegal = || TransitionError {
        from,
        action: reason,
    };

    let next = match action {
        ConnectionAction::Begin {
            retrying: false,
            force,
        } => {
            let allowed = matches!(from, Disconnected | Error) || force;
            if !allowed {
                return Err(illegal());
            }
            ConnectionState {
                status: Connecting,
                retry_count: 0,
                ..ConnectionState::empty(state.max_retries)
            }
        }
        ConnectionAction::Begin { retrying: true, .. } => {
            if from != Error {
                return Err(illegal());
            }
            ConnectionState {
                status: Retrying,
                retry_count: state.retry_count.saturating_add(1),
                ..ConnectionState::empty(state.max_retries)
            }
        }
        ConnectionAction::Succeed {
            account,
            chain_id,
            at,
        } => {
            if !from.is_busy() {
                return Err(illegal());
            }
            ConnectionState {
                status: Connected,
                account: Some(account),
                chain_id: Some(chain_id),
                error: None,
                retry_count: 0,
                max_retries: state.max_retries,
                last_connected_at: at,
            }
        }
        ConnectionAction::Fail { error } => {
            if !from.is_busy() {
                return Err(illegal());
            }
            ConnectionState {
                status: Error,
                error: Some(error),
                retry_count: state.retry_count,
                ..ConnectionState::empty(state.max_retries)
            }
        }
        ConnectionAction::AccountChanged { account } => {
            if from != Connected {
                return Err(illegal());
            }
            ConnectionState {
                account: Some(account),
                ..state.clone()
            }
        }
        ConnectionAction::ChainChanged { chain_id } => {
            if from != Connected {
                return Err(illegal());
            }
            ConnectionState {
                chain_id: Some(chain_id),
                ..state.clone()
            }
        }
        ConnectionAction::Reset => ConnectionState::empty(state.max_retries),
    };

    let transition = StateTransition {
        from,
        to: next.status,
        reason,
    };
    Ok((next, transition))
}
