use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::dates::StayDates;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Build the stay and check it against the calendar limits.
/// `today` is `None` when the start date is not being (re)chosen.
pub(crate) fn validate_stay(
    start: NaiveDate,
    nights: u32,
    today: Option<NaiveDate>,
) -> Result<StayDates, EngineError> {
    if nights == 0 {
        return Err(EngineError::InvalidRange("night count must be positive"));
    }
    if nights > MAX_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if let Some(today) = today {
        if start < today {
            return Err(EngineError::InvalidRange("start date is in the past"));
        }
        let horizon = today
            .checked_add_days(Days::new(MAX_BOOKING_HORIZON_DAYS))
            .unwrap_or(NaiveDate::MAX);
        if start > horizon {
            return Err(EngineError::LimitExceeded("start date too far ahead"));
        }
    }
    Ok(StayDates::new(start, nights)?)
}

pub(crate) fn validate_party(party_size: u32) -> Result<(), EngineError> {
    if party_size == 0 {
        return Err(EngineError::InvalidParty(party_size));
    }
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    Ok(())
}

/// An explicitly requested room must sleep the whole party and be free.
pub(crate) fn check_room_fits(
    room: &RoomState,
    stay: &StayDates,
    party_size: u32,
    ignoring: Option<Ulid>,
) -> Result<(), EngineError> {
    if room.capacity < party_size || !room.is_free(stay, ignoring) {
        return Err(EngineError::RoomUnavailable(room.number));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn past_start_rejected() {
        let today = d(2026, 10, 16);
        let err = validate_stay(d(2026, 10, 15), 2, Some(today)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
        assert!(validate_stay(today, 2, Some(today)).is_ok());
    }

    #[test]
    fn past_start_allowed_when_not_rechosen() {
        let stay = validate_stay(d(2020, 1, 1), 2, None).unwrap();
        assert_eq!(stay.end(), d(2020, 1, 3));
    }

    #[test]
    fn zero_nights_rejected() {
        assert!(matches!(
            validate_stay(d(2026, 11, 1), 0, None),
            Err(EngineError::InvalidRange(_))
        ));
    }

    #[test]
    fn limits_enforced() {
        let today = d(2026, 10, 16);
        assert!(matches!(
            validate_stay(today, MAX_NIGHTS + 1, Some(today)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_stay(d(2035, 1, 1), 1, Some(today)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_stay(today, MAX_NIGHTS, Some(today)).is_ok());
    }

    #[test]
    fn party_bounds() {
        assert_eq!(validate_party(0), Err(EngineError::InvalidParty(0)));
        assert!(validate_party(1).is_ok());
        assert!(validate_party(MAX_PARTY_SIZE).is_ok());
        assert!(validate_party(MAX_PARTY_SIZE + 1).is_err());
    }

    #[test]
    fn explicit_room_checks() {
        let stay = StayDates::new(d(2026, 11, 1), 2).unwrap();
        let mut room = RoomState::new(101, 2, 10_000);
        assert!(check_room_fits(&room, &stay, 2, None).is_ok());
        assert_eq!(
            check_room_fits(&room, &stay, 3, None),
            Err(EngineError::RoomUnavailable(101))
        );
        let owner = Ulid::new();
        room.reserve(owner, &stay);
        assert_eq!(
            check_room_fits(&room, &stay, 1, None),
            Err(EngineError::RoomUnavailable(101))
        );
        assert!(check_room_fits(&room, &stay, 1, Some(owner)).is_ok());
    }
}
