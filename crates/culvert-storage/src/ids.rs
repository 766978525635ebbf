//! Document-id generation.
//!
//! Ids follow `<collection>_<yyyyMMdd_HHmmss>_<n>` where `n` is a counter
//! that restarts at 1 whenever the event second changes. Ids generated
//! within the same second therefore stay unique and sort in insertion
//! order.

use chrono::DateTime;
use chrono_tz::Tz;
use parking_lot::Mutex;

use culvert_core::time::ID_FORMAT;

#[derive(Default)]
struct CounterState {
    last_second: i64,
    counter: u32,
}

/// Per-second counting id generator.
#[derive(Default)]
pub struct IdGenerator {
    state: Mutex<CounterState>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for `collection` at the event instant `ts`.
    pub fn next_id(&self, collection: &str, ts: &DateTime<Tz>) -> String {
        let second = ts.timestamp();
        let mut state = self.state.lock();
        if second != state.last_second {
            state.last_second = second;
            state.counter = 0;
        }
        state.counter += 1;
        format!("{}_{}_{}", collection, ts.format(ID_FORMAT), state.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use culvert_core::time::parse_wire;

    #[test]
    fn id_has_expected_shape() {
        let ids = IdGenerator::new();
        let ts = parse_wire("2025-01-01 00:00:01").unwrap();
        assert_eq!(ids.next_id("Cap", &ts), "Cap_20250101_000001_1");
    }

    #[test]
    fn counter_increments_within_same_second() {
        let ids = IdGenerator::new();
        let ts = parse_wire("2025-01-01 00:00:01").unwrap();
        assert_eq!(ids.next_id("Cap", &ts), "Cap_20250101_000001_1");
        assert_eq!(ids.next_id("Cap", &ts), "Cap_20250101_000001_2");
        assert_eq!(ids.next_id("Cap", &ts), "Cap_20250101_000001_3");
    }

    #[test]
    fn counter_resets_when_second_changes() {
        let ids = IdGenerator::new();
        let t1 = parse_wire("2025-01-01 00:00:01").unwrap();
        let t2 = parse_wire("2025-01-01 00:00:02").unwrap();
        assert_eq!(ids.next_id("Cap", &t1), "Cap_20250101_000001_1");
        assert_eq!(ids.next_id("Cap", &t2), "Cap_20250101_000002_1");
    }

    #[test]
    fn collection_name_is_prefix() {
        let ids = IdGenerator::new();
        let ts = parse_wire("2025-08-25 21:45:12").unwrap();
        assert!(ids.next_id("SttResult", &ts).starts_with("SttResult_20250825_214512_"));
    }
}
