use chrono::{DateTime, Duration, FixedOffset};

use super::types::{Turn, UsageEvent};

/// Default gap, in seconds, allowed between two assistant messages of one turn.
pub const DEFAULT_TURN_WINDOW_SECS: i64 = 10;

/// Groups the events of one log file into billable turns.
///
/// A consecutive run of assistant messages with usage, each within the
/// continuation window of the previous one, is one turn. A message without
/// usage closes the open turn and belongs to none. Consumes its input, so a
/// new segmenter is needed for every pass over a file.
pub struct TurnSegmenter<I> {
    events: I,
    window: Duration,
    open: Vec<UsageEvent>,
    last_timestamp: Option<DateTime<FixedOffset>>,
}

impl<I> TurnSegmenter<I>
where
    I: Iterator<Item = UsageEvent>,
{
    pub fn new(events: I) -> Self {
        Self::with_window(events, Duration::seconds(DEFAULT_TURN_WINDOW_SECS))
    }

    pub fn with_window(events: I, window: Duration) -> Self {
        Self {
            events,
            window,
            open: Vec::new(),
            last_timestamp: None,
        }
    }

    fn flush(&mut self) -> Option<Turn> {
        Turn::from_events(std::mem::take(&mut self.open))
    }

    /// Whether a billable event must start a new turn.
    ///
    /// Missing or unparsable timestamps on either side never merge. A bad
    /// timestamp also replaces the remembered one, so the event after it
    /// starts a fresh turn instead of rejoining the turn before the bad record.
    /// Timestamps without fractional seconds are accepted, unlike a strict
    /// `.SSSZ` reader.
    fn starts_new_turn(&self, event: &UsageEvent, timestamp: Option<DateTime<FixedOffset>>) -> bool {
        if self.open.is_empty() {
            return true;
        }
        match (self.last_timestamp, timestamp) {
            (Some(previous), Some(current)) => {
                current - previous > self.window || !event.is_assistant()
            }
            _ => true,
        }
    }
}

impl<I> Iterator for TurnSegmenter<I>
where
    I: Iterator<Item = UsageEvent>,
{
    type Item = Turn;

    fn next(&mut self) -> Option<Turn> {
        loop {
            let Some(event) = self.events.next() else {
                return self.flush();
            };

            if !event.is_billable() {
                self.last_timestamp = None;
                if let Some(turn) = self.flush() {
                    return Some(turn);
                }
                continue;
            }

            let timestamp = event.timestamp.as_deref().and_then(parse_timestamp);
            let new_turn = self.starts_new_turn(&event, timestamp);
            self.last_timestamp = timestamp;

            if new_turn && !self.open.is_empty() {
                let finished = self.flush();
                self.open.push(event);
                if finished.is_some() {
                    return finished;
                }
            } else {
                self.open.push(event);
            }
        }
    }
}

/// RFC 3339 timestamp, with or without fractional seconds.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(ts).ok()
}
