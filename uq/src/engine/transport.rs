//! Device transport
//!
//! The engine never talks to a modem directly; it dials through a
//! [`UssdTransport`]. [`SimulatedTransport`] stands in for real devices.

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Carrier, CommandType};

use super::config::TransportConfig;

/// One USSD dial sent to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UssdRequest {
    pub sim_id: String,
    pub phone_number: String,
    pub carrier: Carrier,
    /// Code or menu input to send
    pub input: String,
    /// Kind of a single command; `None` for a session step
    pub command_type: Option<CommandType>,
}

/// Failures reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Carrier rejected request: {0}")]
    Rejected(String),
}

/// Sends USSD requests to a device and returns the carrier's response text
#[async_trait]
pub trait UssdTransport: Send + Sync {
    async fn dial(&self, request: &UssdRequest) -> Result<String, TransportError>;
}

/// Transport that fakes carrier responses after a fixed delay
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    config: TransportConfig,
}

impl SimulatedTransport {
    pub fn new(config: TransportConfig) -> Self {
        debug!(?config, "SimulatedTransport::new: called");
        Self { config }
    }

    fn respond(request: &UssdRequest, amount: u32) -> String {
        let whole = amount / 100;
        let cents = amount % 100;
        match request.command_type {
            Some(CommandType::Check) => format!(
                "{}: your balance is {}.{:02} MAD, valid until end of month",
                request.carrier, whole, cents
            ),
            Some(CommandType::Activation) => {
                format!("{}: service {} activated on {}", request.carrier, request.input, request.phone_number)
            }
            Some(CommandType::Topup) => format!(
                "{}: top-up of {}.{:02} MAD applied to {}",
                request.carrier, whole, cents, request.phone_number
            ),
            None if request.input.starts_with('*') => {
                format!("{} menu: 1. Balance 2. Offers 3. Top-up 0. Exit", request.carrier)
            }
            None => format!("{}: option {} selected", request.carrier, request.input),
        }
    }
}

#[async_trait]
impl UssdTransport for SimulatedTransport {
    async fn dial(&self, request: &UssdRequest) -> Result<String, TransportError> {
        debug!(sim_id = %request.sim_id, input = %request.input, "SimulatedTransport::dial: called");

        // ThreadRng is not Send; draw everything before the first await
        let (fails, amount) = {
            let mut rng = rand::rng();
            (
                rng.random_bool(self.config.failure_probability()),
                rng.random_range(500u32..20_000),
            )
        };

        tokio::time::sleep(self.config.latency()).await;

        if fails {
            debug!(sim_id = %request.sim_id, "SimulatedTransport::dial: simulated failure");
            return Err(TransportError::Unreachable(format!(
                "no network response from {}",
                request.phone_number
            )));
        }
        Ok(Self::respond(request, amount))
    }
}
