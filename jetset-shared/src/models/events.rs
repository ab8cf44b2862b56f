use uuid::Uuid;

/// Published after every accepted quote/booking transition.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct QuoteTransitionedEvent {
    pub quote_id: Uuid,
    pub reference_number: String,
    pub kind: String,
    pub from_status: String,
    pub to_status: String,
    pub version: u64,
    pub actor: String,
    pub flight_id: Option<Uuid>,
    pub seats: u32,
    pub timestamp: i64,
}

/// Broadcast whenever a flight's seat counters move.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryChangedEvent {
    pub flight_id: Uuid,
    pub total_seats: u32,
    pub available_seats: u32,
    pub timestamp: i64,
}
