use chrono::{Datelike, NaiveDate};
use configuration::RebalanceFrequency;

/// Decides which trading days are rebalance days.
///
/// The first simulated day always rebalances. After that a calendar cadence
/// fires on the first trading day of each new week, month, quarter or year,
/// and `every_n_days` counts trading days, not calendar days.
#[derive(Debug, Clone)]
pub struct RebalanceSchedule {
    frequency: RebalanceFrequency,
    previous: Option<NaiveDate>,
    days_since: usize,
}

impl RebalanceSchedule {
    pub fn new(frequency: RebalanceFrequency) -> Self {
        Self {
            frequency,
            previous: None,
            days_since: 0,
        }
    }

    /// Advances to `date`, which must be later than the last date seen.
    pub fn is_rebalance(&mut self, date: NaiveDate) -> bool {
        let Some(previous) = self.previous.replace(date) else {
            self.days_since = 0;
            return true;
        };
        self.days_since += 1;

        let fire = match self.frequency {
            RebalanceFrequency::Daily => true,
            RebalanceFrequency::Weekly => previous.iso_week() != date.iso_week(),
            RebalanceFrequency::Monthly => {
                (previous.year(), previous.month()) != (date.year(), date.month())
            }
            RebalanceFrequency::Quarterly => {
                (previous.year(), previous.month0() / 3) != (date.year(), date.month0() / 3)
            }
            RebalanceFrequency::Annual => previous.year() != date.year(),
            RebalanceFrequency::EveryNDays { n } => self.days_since >= n.max(1),
        };
        if fire {
            self.days_since = 0;
        }
        fire
    }
}
