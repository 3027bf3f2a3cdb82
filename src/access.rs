//! Capability checks between the connection and the engine.
//!
//! The engine trusts every intent it receives; this layer decides which
//! intents a connected account may form.

use std::collections::HashSet;

use crate::model::{Reservation, ReservationFilter, StayRequest};
use crate::sql::Command;

/// The account behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub account: String,
    /// Staff: may act for any customer and manage rooms and payments.
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    Forbidden(&'static str),
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessError::Forbidden(why) => write!(f, "permission denied: {why}"),
        }
    }
}

impl std::error::Error for AccessError {}

/// Which accounts are staff.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    staff: HashSet<String>,
}

impl AccessPolicy {
    pub fn new(staff: impl IntoIterator<Item = String>) -> Self {
        Self {
            staff: staff.into_iter().collect(),
        }
    }

    pub fn requester(&self, account: &str) -> Requester {
        Requester {
            account: account.to_string(),
            privileged: self.staff.contains(account),
        }
    }
}

impl Requester {
    /// Gate a statement before it reaches the engine. Ownership of an
    /// existing reservation is checked separately once it has been loaded.
    pub fn authorize(&self, cmd: &Command) -> Result<(), AccessError> {
        if self.privileged {
            return Ok(());
        }
        match cmd {
            Command::InsertRoom { .. } | Command::UpdateRoom { .. } | Command::DeleteRoom { .. } => {
                Err(AccessError::Forbidden("room catalog is staff only"))
            }
            Command::PayReservation { .. } => Err(AccessError::Forbidden("payments are staff only")),
            Command::InsertReservation {
                customer: Some(customer),
                ..
            } if *customer != self.account => {
                Err(AccessError::Forbidden("cannot book for another customer"))
            }
            _ => Ok(()),
        }
    }

    /// Build the engine request for a booking. A missing customer means the
    /// account books for itself.
    pub fn stay_request(
        &self,
        customer: Option<String>,
        start: chrono::NaiveDate,
        nights: u32,
        party_size: u32,
        room: Option<u32>,
    ) -> StayRequest {
        StayRequest {
            requester: self.account.clone(),
            customer: customer.unwrap_or_else(|| self.account.clone()),
            start,
            nights,
            party_size,
            room,
        }
    }

    pub fn check_owner(&self, reservation: &Reservation) -> Result<(), AccessError> {
        if self.privileged || reservation.requester == self.account {
            Ok(())
        } else {
            Err(AccessError::Forbidden("reservation belongs to another account"))
        }
    }

    /// Narrow a listing to what this account may see.
    pub fn scope(&self, mut filter: ReservationFilter) -> ReservationFilter {
        if !self.privileged {
            filter.requester = Some(self.account.clone());
        }
        filter
    }
}
