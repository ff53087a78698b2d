//! SIM domain type

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::carrier::Carrier;
use super::id::{DeviceId, SimId, generate_id};

/// A SIM card with a daily USSD quota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sim {
    pub id: SimId,
    pub device_id: DeviceId,
    pub phone_number: String,
    pub carrier: Carrier,
    /// Executions allowed per day (always positive)
    pub daily_quota: u32,
    /// Executions recorded since `last_reset_date`
    pub used_today: u32,
    pub last_reset_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Sim {
    /// Create a fresh SIM with no usage, reset as of `today`
    ///
    /// The registry rejects a zero quota before building one.
    pub fn new(
        device_id: impl Into<DeviceId>,
        phone_number: impl Into<String>,
        carrier: Carrier,
        daily_quota: u32,
        today: NaiveDate,
    ) -> Self {
        Self {
            id: generate_id("sim", None),
            device_id: device_id.into(),
            phone_number: phone_number.into(),
            carrier,
            daily_quota,
            used_today: 0,
            last_reset_date: today,
            created_at: Utc::now(),
        }
    }

    /// Remaining executions for today (zero when over-run)
    pub fn remaining(&self) -> u32 {
        self.daily_quota.saturating_sub(self.used_today)
    }

    pub fn has_quota(&self) -> bool {
        self.used_today < self.daily_quota
    }

    /// Usage above the quota; non-zero only after an external over-run
    pub fn overrun(&self) -> u32 {
        self.used_today.saturating_sub(self.daily_quota)
    }

    /// Zero the counter if `today` is past the last reset date
    ///
    /// Returns true when a reset happened. A date equal to or before
    /// `last_reset_date` never touches the counter.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today > self.last_reset_date {
            self.used_today = 0;
            self.last_reset_date = today;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_new_sim_has_full_quota() {
        let sim = Sim::new("dev-1", "+212600000001", Carrier::Iam, 20, day(1));
        assert_eq!(sim.used_today, 0);
        assert_eq!(sim.remaining(), 20);
        assert!(sim.has_quota());
    }

    #[test]
    fn test_roll_over_only_when_date_advances() {
        let mut sim = Sim::new("dev-1", "+212600000001", Carrier::Inwi, 20, day(2));
        sim.used_today = 7;

        assert!(!sim.roll_over(day(2)));
        assert!(!sim.roll_over(day(1)));
        assert_eq!(sim.used_today, 7);

        assert!(sim.roll_over(day(3)));
        assert_eq!(sim.used_today, 0);
        assert_eq!(sim.last_reset_date, day(3));
    }

    #[test]
    fn test_overrun_reporting() {
        let mut sim = Sim::new("dev-1", "+212600000001", Carrier::Orange, 20, day(1));
        sim.used_today = 22;
        assert_eq!(sim.remaining(), 0);
        assert_eq!(sim.overrun(), 2);
        assert!(!sim.has_quota());
    }
}
