use chrono::{DateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Sleep window `[bed_time, wake_time)`, wrapping past midnight when bed time is later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightWindow {
    pub bed_time: NaiveTime,
    pub wake_time: NaiveTime,
}

impl NightWindow {
    pub fn new(bed_time: NaiveTime, wake_time: NaiveTime) -> Self {
        Self {
            bed_time,
            wake_time,
        }
    }

    pub fn crosses_midnight(&self) -> bool {
        self.bed_time > self.wake_time
    }

    // Equal bed and wake times give an empty window.
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.crosses_midnight() {
            now > self.bed_time || now < self.wake_time
        } else {
            self.bed_time <= now && now < self.wake_time
        }
    }

    pub fn is_night_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.contains(now.time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn window_across_midnight() {
        let window = NightWindow::new(time(22, 0), time(6, 0));

        assert!(window.crosses_midnight());
        assert!(window.contains(time(23, 30)));
        assert!(window.contains(time(5, 0)));
        assert!(!window.contains(time(12, 0)));
        assert!(!window.contains(time(6, 0)));
    }

    #[test]
    fn window_within_one_day() {
        let window = NightWindow::new(time(1, 0), time(3, 0));

        assert!(!window.crosses_midnight());
        assert!(window.contains(time(2, 0)));
        assert!(window.contains(time(1, 0)));
        assert!(!window.contains(time(3, 0)));
        assert!(!window.contains(time(4, 0)));
    }

    #[test]
    fn bed_time_boundary_only_counts_when_not_wrapping() {
        // Crossing windows compare strictly against bed time.
        let crossing = NightWindow::new(time(22, 0), time(6, 0));
        assert!(!crossing.contains(time(22, 0)));
    }

    #[test]
    fn equal_times_never_match() {
        let window = NightWindow::new(time(22, 0), time(22, 0));

        assert!(!window.contains(time(22, 0)));
        assert!(!window.contains(time(22, 1)));
        assert!(!window.contains(time(21, 59)));
    }

    #[test]
    fn uses_local_time_of_day() {
        let window = NightWindow::new(time(22, 0), time(6, 0));
        let local = FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, 23, 15, 0)
            .unwrap();

        assert!(window.is_night_at(&local));
        assert!(!window.is_night_at(&local.with_timezone(&chrono::Utc)));
    }
}
