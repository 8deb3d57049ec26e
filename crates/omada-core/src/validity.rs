//! Validity intervals and the union/intersection algebra over them.
//!
//! MO only stores validity at day granularity, so every [`Validity`] is
//! normalised to calendar dates when it is constructed. Anything that compares
//! validities therefore never sees time-of-day noise from the source system.

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// A closed date interval `[from, to]`; `to = None` means open-ended.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
  Deserialize,
)]
pub struct Validity {
  pub from: NaiveDate,
  pub to:   Option<NaiveDate>,
}

impl Validity {
  /// Build a validity from timestamps, truncating both bounds to midnight in
  /// the timestamps' own offset.
  pub fn new<Tz: TimeZone>(from: DateTime<Tz>, to: Option<DateTime<Tz>>) -> Self {
    Self {
      from: normalize(from),
      to:   to.map(normalize),
    }
  }

  pub fn from_dates(from: NaiveDate, to: Option<NaiveDate>) -> Self {
    Self { from, to }
  }

  /// An interval starting at `from` with no end.
  pub fn open(from: NaiveDate) -> Self { Self { from, to: None } }

  pub fn is_open(&self) -> bool { self.to.is_none() }

  /// Whether `date` lies within the interval (both bounds inclusive).
  pub fn contains(&self, date: NaiveDate) -> bool {
    self.from <= date && self.to.is_none_or(|to| date <= to)
  }

  /// Whether the interval has not ended before `today`.
  pub fn is_current_or_future(&self, today: NaiveDate) -> bool {
    self.to.is_none_or(|to| today <= to)
  }

  /// Smallest interval covering all of `validities`.
  ///
  /// Returns `None` when given no validities.
  pub fn union<'a>(
    validities: impl IntoIterator<Item = &'a Validity>,
  ) -> Option<Validity> {
    validities.into_iter().copied().reduce(|acc, v| Validity {
      from: acc.from.min(v.from),
      to:   match (acc.to, v.to) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
      },
    })
  }

  /// Overlap of all of `validities`.
  ///
  /// The result is not checked for emptiness; callers that care must compare
  /// `from` and `to` themselves. Returns `None` when given no validities.
  pub fn intersection<'a>(
    validities: impl IntoIterator<Item = &'a Validity>,
  ) -> Option<Validity> {
    validities.into_iter().copied().reduce(|acc, v| Validity {
      from: acc.from.max(v.from),
      to:   match (acc.to, v.to) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
      },
    })
  }
}

/// Truncate a timestamp to its calendar day.
pub fn normalize<Tz: TimeZone>(at: DateTime<Tz>) -> NaiveDate { at.date_naive() }

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn closed(from: NaiveDate, to: NaiveDate) -> Validity {
    Validity::from_dates(from, Some(to))
  }

  #[test]
  fn same_day_timestamps_normalize_equal() {
    let morning = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 1).unwrap();
    let evening = Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 59).unwrap();
    assert_eq!(normalize(morning), normalize(evening));
    assert_eq!(
      Validity::new(morning, Some(evening)),
      Validity::new(evening, Some(morning)),
    );
  }

  #[test]
  fn single_argument_is_returned_unchanged() {
    let v = closed(date(2020, 1, 1), date(2021, 1, 1));
    assert_eq!(Validity::union([&v]), Some(v));
    assert_eq!(Validity::intersection([&v]), Some(v));
  }

  #[test]
  fn empty_input_has_no_result() {
    assert_eq!(Validity::union([]), None);
    assert_eq!(Validity::intersection([]), None);
  }

  #[test]
  fn union_takes_widest_bounds() {
    let a = closed(date(2020, 1, 1), date(2020, 6, 1));
    let b = closed(date(2020, 3, 1), date(2021, 1, 1));
    assert_eq!(
      Validity::union([&a, &b]),
      Some(closed(date(2020, 1, 1), date(2021, 1, 1)))
    );
  }

  #[test]
  fn union_with_open_end_is_open() {
    let a = closed(date(2020, 1, 1), date(2020, 6, 1));
    let b = Validity::open(date(2021, 1, 1));
    assert_eq!(Validity::union([&a, &b]), Some(Validity::open(date(2020, 1, 1))));
  }

  #[test]
  fn intersection_with_open_end_is_bounded_by_other() {
    let a = closed(date(2020, 1, 1), date(2020, 6, 1));
    let b = Validity::open(date(2019, 1, 1));
    assert_eq!(Validity::intersection([&a, &b]), Some(a));
    assert_eq!(Validity::intersection([&b, &a]), Some(a));
  }

  #[test]
  fn intersection_of_open_intervals_is_open() {
    let a = Validity::open(date(2020, 1, 1));
    let b = Validity::open(date(2022, 1, 1));
    assert_eq!(Validity::intersection([&a, &b]), Some(b));
  }

  #[test]
  fn intersection_with_self_is_self() {
    let v = closed(date(2020, 1, 1), date(2020, 6, 1));
    assert_eq!(Validity::intersection([&v, &v]), Some(v));
  }

  #[test]
  fn union_of_intersection_covers_original() {
    let v1 = closed(date(2020, 1, 1), date(2020, 12, 31));
    let v2 = closed(date(2020, 6, 1), date(2022, 1, 1));
    let i = Validity::intersection([&v1, &v2]).unwrap();
    let u = Validity::union([&i, &v1]).unwrap();
    assert!(u.from <= v1.from);
    assert!(u.to >= v1.to);
  }

  #[test]
  fn disjoint_intersection_is_inverted_not_rejected() {
    let a = closed(date(2020, 1, 1), date(2020, 2, 1));
    let b = closed(date(2021, 1, 1), date(2021, 2, 1));
    let i = Validity::intersection([&a, &b]).unwrap();
    assert!(i.to.unwrap() < i.from);
  }

  #[test]
  fn algebra_is_order_independent() {
    let a = closed(date(2020, 1, 1), date(2020, 6, 1));
    let b = Validity::open(date(2019, 5, 1));
    let c = closed(date(2020, 2, 1), date(2023, 1, 1));
    assert_eq!(
      Validity::union([&a, &b, &c]),
      Validity::union([&c, &a, &b])
    );
    assert_eq!(
      Validity::intersection([&a, &b, &c]),
      Validity::intersection([&b, &c, &a])
    );
  }

  #[test]
  fn contains_respects_inclusive_bounds() {
    let v = closed(date(2020, 1, 1), date(2020, 1, 31));
    assert!(v.contains(date(2020, 1, 1)));
    assert!(v.contains(date(2020, 1, 31)));
    assert!(!v.contains(date(2020, 2, 1)));
    assert!(Validity::open(date(2020, 1, 1)).contains(date(2999, 1, 1)));
  }
}
