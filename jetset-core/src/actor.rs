use serde::{Deserialize, Serialize};
use std::fmt;

/// Who triggered a transition. Carried explicitly through every lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    Client,
    Staff(String),
    PaymentGateway,
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Client => write!(f, "client"),
            Actor::Staff(id) => write!(f, "staff:{}", id),
            Actor::PaymentGateway => write!(f, "payment-gateway"),
            Actor::System => write!(f, "system"),
        }
    }
}
