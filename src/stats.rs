use crate::parser::RealtimeTripUpdate;

/// Counts trips whose vehicle is known to be on trip.
///
/// An absent flag counts as not on trip.
pub fn count_on_trip(updates: &[RealtimeTripUpdate]) -> usize {
    updates.iter().filter(|u| u.on_trip == Some(true)).count()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TripStats {
    pub total_trips: usize,
    pub on_trip: usize,
    pub cancelled: usize,
    pub with_stop_id: usize,
    pub with_route_id: usize,
}

impl TripStats {
    pub fn from_updates(updates: &[RealtimeTripUpdate]) -> Self {
        let mut s = TripStats {
            total_trips: updates.len(),
            on_trip: count_on_trip(updates),
            ..Default::default()
        };

        for u in updates {
            if u.on_trip == Some(false) {
                s.cancelled += 1;
            }

            if u.stop_id.is_some() {
                s.with_stop_id += 1;
            }

            if u.route_id.is_some() {
                s.with_route_id += 1;
            }
        }

        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn stop_coverage_pct(&self) -> f64 {
        Self::pct(self.with_stop_id, self.total_trips)
    }
}
