// Published departure board: the latest sorted arrivals plus a rotation cursor

use serde::Serialize;

use crate::arrivals::{Arrival, CycleReport, FetchFailure};
use crate::mbta_api_models::format_timestamp_full;

#[derive(Debug, Clone, Default)]
pub struct BoardState {
    arrivals: Vec<Arrival>,
    cursor: usize,
    last_update: Option<i64>,
    failures: Vec<FetchFailure>,
    cycles: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardStats {
    pub total_arrivals: usize,
    pub cursor: usize,
    pub cycles: u64,
    pub last_update: Option<String>,
    pub degraded: bool,
    pub failures: Vec<FetchFailure>,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the previous cycle's list. The cursor survives only if it still
    /// points inside the new list.
    pub fn replace(&mut self, report: CycleReport) {
        self.arrivals = report.arrivals;
        self.failures = report.failures;
        self.last_update = Some(report.reference_time.timestamp());
        self.cycles += 1;
        if self.cursor >= self.arrivals.len() {
            self.cursor = 0;
        }
    }

    pub fn arrivals(&self) -> &[Arrival] {
        &self.arrivals
    }

    pub fn current_page(&self, page_size: usize) -> &[Arrival] {
        let start = self.cursor.min(self.arrivals.len());
        let end = start.saturating_add(page_size).min(self.arrivals.len());
        &self.arrivals[start..end]
    }

    pub fn advance(&mut self, page_size: usize) {
        self.cursor = (self.cursor + page_size) % self.arrivals.len().max(1);
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn stats(&self) -> BoardStats {
        BoardStats {
            total_arrivals: self.arrivals.len(),
            cursor: self.cursor,
            cycles: self.cycles,
            last_update: self.last_update.map(format_timestamp_full),
            degraded: self.is_degraded(),
            failures: self.failures.clone(),
        }
    }
}

pub fn minutes_label(minutes: u32) -> String {
    if minutes > 0 {
        format!("{} min", minutes)
    } else {
        "Now".to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arrivals::Symbol;
    use chrono::{FixedOffset, TimeZone};

    fn report(minutes: &[u32]) -> CycleReport {
        CycleReport {
            reference_time: FixedOffset::west_opt(5 * 3600)
                .unwrap()
                .with_ymd_and_hms(2025, 3, 1, 14, 0, 0)
                .unwrap(),
            arrivals: minutes
                .iter()
                .map(|&m| Arrival {
                    symbol: Symbol::RedLine,
                    destination: "Alewife".to_string(),
                    minutes: m,
                })
                .collect(),
            failures: Vec::new(),
        }
    }

    fn page_minutes(board: &BoardState) -> Vec<u32> {
        board.current_page(3).iter().map(|a| a.minutes).collect()
    }

    #[test]
    fn test_rotation_wraps_through_pages() {
        let mut board = BoardState::new();
        board.replace(report(&[1, 2, 3, 4, 5, 6, 7]));

        assert_eq!(page_minutes(&board), vec![1, 2, 3]);
        board.advance(3);
        assert_eq!(page_minutes(&board), vec![4, 5, 6]);
        board.advance(3);
        assert_eq!(page_minutes(&board), vec![7]);
        board.advance(3);
        // (6 + 3) % 7
        assert_eq!(page_minutes(&board), vec![3, 4, 5]);
    }

    #[test]
    fn test_empty_board_stays_at_zero() {
        let mut board = BoardState::new();
        assert!(board.current_page(3).is_empty());
        board.advance(3);
        assert!(board.current_page(3).is_empty());
        assert_eq!(board.stats().cursor, 0);
    }

    #[test]
    fn test_replace_does_not_accumulate() {
        let mut board = BoardState::new();
        board.replace(report(&[1, 2, 3]));
        board.replace(report(&[1, 2, 3]));
        assert_eq!(board.arrivals().len(), 3);
        assert_eq!(board.stats().cycles, 2);
    }

    #[test]
    fn test_replace_resets_cursor_past_new_end() {
        let mut board = BoardState::new();
        board.replace(report(&[1, 2, 3, 4, 5]));
        board.advance(3);
        board.replace(report(&[8, 9]));
        assert_eq!(page_minutes(&board), vec![8, 9]);

        board.replace(report(&[1, 2, 3, 4, 5]));
        board.advance(3);
        board.replace(report(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(page_minutes(&board), vec![4, 5, 6]);
    }

    #[test]
    fn test_failures_mark_board_degraded() {
        let mut board = BoardState::new();
        let mut failed = report(&[]);
        failed.failures.push(FetchFailure {
            stop_id: "1812".to_string(),
            route_id: "47".to_string(),
            reason: "Network error: timed out".to_string(),
        });
        board.replace(failed);
        assert!(board.is_degraded());
        assert_eq!(board.stats().failures.len(), 1);

        board.replace(report(&[2]));
        assert!(!board.is_degraded());
        assert_eq!(board.stats().last_update.as_deref(), Some("2025-03-01 14:00:00"));
    }

    #[test]
    fn test_minutes_label() {
        assert_eq!(minutes_label(0), "Now");
        assert_eq!(minutes_label(1), "1 min");
        assert_eq!(minutes_label(30), "30 min");
    }
}
