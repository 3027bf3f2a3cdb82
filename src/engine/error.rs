use ulid::Ulid;

use crate::model::{Money, RoomNumber};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Bad dates or night count.
    InvalidRange(&'static str),
    InvalidParty(u32),
    /// No combination of free rooms covers the party.
    InsufficientCapacity { party_size: u32, available: u32 },
    /// The requested room is occupied or too small.
    RoomUnavailable(RoomNumber),
    ReservationNotFound(Ulid),
    RoomNotFound(RoomNumber),
    ReservationExists(Ulid),
    RoomExists(RoomNumber),
    /// Room is still referenced by a reservation.
    RoomInUse(RoomNumber),
    PriceMismatch { expected: Money, got: Money },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange(why) => write!(f, "invalid range: {why}"),
            EngineError::InvalidParty(n) => write!(f, "invalid party size: {n}"),
            EngineError::InsufficientCapacity {
                party_size,
                available,
            } => write!(
                f,
                "no rooms available: party of {party_size}, {available} free beds"
            ),
            EngineError::RoomUnavailable(n) => write!(f, "room {n} unavailable"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::RoomNotFound(n) => write!(f, "room not found: {n}"),
            EngineError::ReservationExists(id) => write!(f, "reservation already exists: {id}"),
            EngineError::RoomExists(n) => write!(f, "room already exists: {n}"),
            EngineError::RoomInUse(n) => write!(f, "room {n} is referenced by a reservation"),
            EngineError::PriceMismatch { expected, got } => {
                write!(f, "price mismatch: expected {expected}, got {got}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<crate::dates::InvalidRange> for EngineError {
    fn from(_: crate::dates::InvalidRange) -> Self {
        EngineError::InvalidRange("night count must be positive")
    }
}
