use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// A stay expressed as a check-in date plus a night count.
///
/// The occupied dates are the half-open range `[start, start + nights)`:
/// the checkout day itself is never occupied, so a room can be checked out
/// of and checked into on the same date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayDates {
    pub start: NaiveDate,
    pub nights: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRange;

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid date range")
    }
}

impl std::error::Error for InvalidRange {}

impl StayDates {
    pub fn new(start: NaiveDate, nights: u32) -> Result<Self, InvalidRange> {
        if nights == 0 {
            return Err(InvalidRange);
        }
        start
            .checked_add_days(Days::new(u64::from(nights)))
            .ok_or(InvalidRange)?;
        Ok(Self { start, nights })
    }

    /// Checkout date. Always `start + nights`.
    pub fn end(&self) -> NaiveDate {
        self.start + Days::new(u64::from(self.nights))
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take(self.nights as usize).collect()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end()
    }

    pub fn overlaps(&self, other: &StayDates) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// `nights` consecutive dates starting at `start`.
pub fn occupied_dates(start: NaiveDate, nights: i64) -> Result<Vec<NaiveDate>, InvalidRange> {
    let nights = u32::try_from(nights).map_err(|_| InvalidRange)?;
    Ok(StayDates::new(start, nights)?.dates())
}

/// True iff the two date sets share at least one date.
pub fn overlaps(a: &[NaiveDate], b: &[NaiveDate]) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let large: std::collections::HashSet<&NaiveDate> = large.iter().collect();
    small.iter().any(|d| large.contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn three_nights_three_dates() {
        let dates = occupied_dates(d(2026, 11, 1), 3).unwrap();
        assert_eq!(dates, vec![d(2026, 11, 1), d(2026, 11, 2), d(2026, 11, 3)]);
    }

    #[test]
    fn zero_or_negative_nights_rejected() {
        assert_eq!(occupied_dates(d(2026, 11, 1), 0), Err(InvalidRange));
        assert_eq!(occupied_dates(d(2026, 11, 1), -2), Err(InvalidRange));
    }

    #[test]
    fn crosses_month_and_year() {
        let dates = occupied_dates(d(2026, 12, 30), 3).unwrap();
        assert_eq!(dates, vec![d(2026, 12, 30), d(2026, 12, 31), d(2027, 1, 1)]);
    }

    #[test]
    fn end_is_start_plus_nights() {
        let stay = StayDates::new(d(2027, 2, 27), 3).unwrap();
        assert_eq!(stay.end(), d(2027, 3, 2));
        assert!(stay.contains(d(2027, 3, 1)));
        assert!(!stay.contains(stay.end())); // checkout day is free
    }

    #[test]
    fn overlap_detection() {
        let a = occupied_dates(d(2026, 11, 1), 3).unwrap();
        let b = occupied_dates(d(2026, 11, 3), 2).unwrap();
        let c = occupied_dates(d(2026, 11, 4), 2).unwrap();
        assert!(overlaps(&a, &b));
        assert!(overlaps(&b, &a));
        assert!(!overlaps(&a, &c)); // same-day turnover
        assert!(!overlaps(&a, &[]));
    }

    #[test]
    fn stay_overlap_matches_date_overlap() {
        let a = StayDates::new(d(2026, 11, 1), 3).unwrap();
        let b = StayDates::new(d(2026, 11, 4), 1).unwrap();
        let c = StayDates::new(d(2026, 10, 30), 3).unwrap();
        assert_eq!(a.overlaps(&b), overlaps(&a.dates(), &b.dates()));
        assert_eq!(a.overlaps(&c), overlaps(&a.dates(), &c.dates()));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn end_of_calendar_rejected() {
        assert_eq!(StayDates::new(NaiveDate::MAX, 1), Err(InvalidRange));
    }
}
