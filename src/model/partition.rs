use std::fmt::Display;

use chrono::{DateTime, Months, TimeDelta, Utc};

/// A half-open creation date interval `[start, end)` used to scope a search query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateRangePartition {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,

    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
}

impl DateRangePartition {
    /// Creates a new `DateRangePartition` instance.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Renders the `created:` search qualifier for this partition.
    ///
    /// The search API ranges are inclusive on both ends, so the upper bound is
    /// moved back by one second.
    pub fn created_qualifier(&self) -> String {
        let last_second = self.end - TimeDelta::seconds(1);

        format!(
            "created:{}..{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            last_second.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }

    #[cfg(test)]
    /// Creates a dummy partition covering January 2019.
    pub(crate) fn dummy() -> Self {
        Self::new(
            DateTime::parse_from_rfc3339("2019-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            DateTime::parse_from_rfc3339("2019-02-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }
}

impl Display for DateRangePartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// The unit of a partition width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GranularityUnit {
    Day,
    Week,
    Month,
}

/// The width of the partitions produced by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Granularity {
    /// The unit of the width.
    pub unit: GranularityUnit,

    /// How many units a partition spans.
    pub step: u32,
}

impl Granularity {
    /// Creates a new `Granularity` instance.
    pub fn new(unit: GranularityUnit, step: u32) -> Self {
        Self { unit, step }
    }

    /// One calendar month.
    pub fn monthly() -> Self {
        Self::new(GranularityUnit::Month, 1)
    }

    /// One week.
    pub fn weekly() -> Self {
        Self::new(GranularityUnit::Week, 1)
    }

    /// Advances `from` by one partition width, `None` if the result is out of range.
    fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = self.step.max(1);
        match self.unit {
            GranularityUnit::Day => from.checked_add_signed(TimeDelta::try_days(step as i64)?),
            GranularityUnit::Week => {
                from.checked_add_signed(TimeDelta::try_weeks(step as i64)?)
            }
            GranularityUnit::Month => from.checked_add_months(Months::new(step)),
        }
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self::monthly()
    }
}

impl Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{:?}", self.step, self.unit)
    }
}

/// Plans the date range partitions covering a crawl window.
///
/// The planner is a pure description of the window: iterating it does not
/// consume it, so the same plan can be walked several times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlanner {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
}

impl PartitionPlanner {
    /// Creates a new `PartitionPlanner` for the window `[start, end)`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, granularity: Granularity) -> Self {
        Self {
            start,
            end,
            granularity,
        }
    }

    /// Returns a lazy iterator over the partitions, in chronological order.
    pub fn partitions(&self) -> Partitions {
        Partitions {
            next_start: self.start,
            end: self.end,
            granularity: self.granularity,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }
}

impl IntoIterator for &PartitionPlanner {
    type Item = DateRangePartition;
    type IntoIter = Partitions;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions()
    }
}

/// Iterator over the partitions of a [`PartitionPlanner`].
#[derive(Debug, Clone)]
pub struct Partitions {
    next_start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
}

impl Iterator for Partitions {
    type Item = DateRangePartition;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start >= self.end {
            return None;
        }
        let start = self.next_start;
        let end = self
            .granularity
            .advance(start)
            .map(|end| end.min(self.end))
            .unwrap_or(self.end);
        self.next_start = end;

        Some(DateRangePartition::new(start, end))
    }
}
