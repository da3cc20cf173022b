use std::collections::BTreeSet;

use time::{OffsetDateTime, UtcOffset};

use crate::Interval;
use crate::bucket::align;

/// Every aligned bucket start in `[range.0, range.1)`.
pub fn grid(
    range: (OffsetDateTime, OffsetDateTime),
    interval: Interval,
    offset: UtcOffset,
) -> Vec<OffsetDateTime> {
    let (start, end) = range;
    let step = interval.as_duration();
    if step.is_zero() || start >= end {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut cursor = align(start, interval, offset);
    if cursor < start {
        cursor += step;
    }
    while cursor < end {
        out.push(cursor);
        cursor += step;
    }
    out
}

/// Expected bucket starts in `range` that have no data.
///
/// Candidates before `first_data_point` are dropped so a symbol never reports
/// gaps from before its first trade.
pub fn gaps(
    range: (OffsetDateTime, OffsetDateTime),
    interval: Interval,
    present: &BTreeSet<OffsetDateTime>,
    first_data_point: OffsetDateTime,
    offset: UtcOffset,
) -> BTreeSet<OffsetDateTime> {
    grid(range, interval, offset)
        .into_iter()
        .filter(|start| *start >= first_data_point && !present.contains(start))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::{datetime, offset};

    #[test]
    fn reports_missing_minutes() {
        let m0 = datetime!(2024-04-09 13:30:00 UTC);
        let minute = |n: i64| m0 + Duration::minutes(n);
        let present: BTreeSet<_> = [minute(0), minute(1), minute(3)].into_iter().collect();

        let missing = gaps(
            (minute(0), minute(5)),
            Interval::Minute(1),
            &present,
            minute(0),
            UtcOffset::UTC,
        );

        assert_eq!(missing, [minute(2), minute(4)].into_iter().collect());
    }

    #[test]
    fn ignores_candidates_before_first_trade() {
        let d0 = datetime!(2024-01-01 00:00:00 -5);
        let day = |n: i64| d0 + Duration::days(n);
        let present: BTreeSet<_> = [day(3), day(5)].into_iter().collect();

        let missing = gaps(
            (day(0), day(6)),
            Interval::Day(1),
            &present,
            day(3),
            offset!(-5),
        );

        assert_eq!(missing, [day(4)].into_iter().collect());
    }

    #[test]
    fn grid_starts_at_first_aligned_boundary() {
        let starts = grid(
            (
                datetime!(2024-04-09 13:30:30 UTC),
                datetime!(2024-04-09 13:33:00 UTC),
            ),
            Interval::Minute(1),
            UtcOffset::UTC,
        );
        assert_eq!(
            starts,
            vec![
                datetime!(2024-04-09 13:31:00 UTC),
                datetime!(2024-04-09 13:32:00 UTC),
            ]
        );
    }

    #[test]
    fn empty_range_has_no_grid() {
        let t = datetime!(2024-04-09 13:30:00 UTC);
        assert!(grid((t, t), Interval::Second(1), UtcOffset::UTC).is_empty());
    }
}
