//! Feed message parsing
//!
//! A feed message carries, per instrument, the last traded price and
//! optionally the base bar that just completed:
//!
//! ```json
//! {"feeds": {"ABC": {"ltp": 101.5, "bar": {"ts": "2025-01-02T09:20:00",
//!   "open": 101.0, "high": 101.8, "low": 100.9, "close": 101.5, "volume": 12000}}}}
//! ```
//!
//! Entries are parsed independently: a bad `ltp` drops the instrument, a bad
//! `bar` drops only the bar.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::bars::{parse_timestamp, Bar};

/// One instrument's update within a feed message
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    pub instrument: String,
    pub ltp: f64,
    pub bar: Option<Bar>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMessage {
    pub updates: Vec<FeedUpdate>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    ts: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_bar(instrument: &str, value: &Value) -> Option<Bar> {
    let raw: RawBar = match serde_json::from_value(value.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("{}: malformed bar skipped: {}", instrument, e);
            return None;
        }
    };
    let Some(timestamp) = parse_timestamp(&raw.ts) else {
        warn!("{}: bad bar timestamp {:?}", instrument, raw.ts);
        return None;
    };
    let bar = Bar::new(instrument, timestamp, raw.open, raw.high, raw.low, raw.close, raw.volume);
    if !bar.is_well_formed() {
        warn!("{}: inconsistent bar at {} skipped", instrument, timestamp);
        return None;
    }
    Some(bar)
}

impl FeedMessage {
    pub fn parse(value: &Value) -> Self {
        let Some(feeds) = value.get("feeds").and_then(Value::as_object) else {
            debug!("feed message without a feeds object");
            return Self::default();
        };

        let updates = feeds
            .iter()
            .filter_map(|(instrument, entry)| {
                let ltp = entry.get("ltp").and_then(number).filter(|p| p.is_finite() && *p > 0.0);
                let Some(ltp) = ltp else {
                    warn!("{}: missing or invalid ltp, skipped", instrument);
                    return None;
                };
                let bar = entry.get("bar").filter(|b| !b.is_null()).and_then(|b| parse_bar(instrument, b));
                Some(FeedUpdate {
                    instrument: instrument.clone(),
                    ltp,
                    bar,
                })
            })
            .collect();

        Self { updates }
    }

    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::parse(&value))
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Newest bar timestamp carried by the message
    pub fn latest_bar_time(&self) -> Option<NaiveDateTime> {
        self.updates.iter().filter_map(|u| u.bar.as_ref()).map(|b| b.timestamp).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_message() {
        let msg = FeedMessage::parse(&json!({
            "feeds": {
                "ABC": {"ltp": 101.5, "bar": {"ts": "2025-01-02T09:20:00", "open": 101.0, "high": 101.8,
                        "low": 100.9, "close": 101.5, "volume": 12000}},
                "XYZ": {"ltp": "55.25"}
            }
        }));
        assert_eq!(msg.updates.len(), 2);

        let abc = &msg.updates[0];
        assert_eq!(abc.instrument, "ABC");
        assert_eq!(abc.ltp, 101.5);
        let bar = abc.bar.as_ref().unwrap();
        assert_eq!(bar.high, 101.8);
        assert_eq!(bar.volume, 12000.0);

        assert_eq!(msg.updates[1].ltp, 55.25);
        assert!(msg.updates[1].bar.is_none());
        assert_eq!(msg.latest_bar_time(), parse_timestamp("2025-01-02T09:20:00"));
    }

    #[test]
    fn test_bad_ltp_skips_instrument() {
        let msg = FeedMessage::parse(&json!({
            "feeds": {
                "A": {"ltp": "n/a"},
                "B": {"ltp": -3.0},
                "C": {},
                "D": {"ltp": 10.0}
            }
        }));
        assert_eq!(msg.updates.len(), 1);
        assert_eq!(msg.updates[0].instrument, "D");
    }

    #[test]
    fn test_bad_bar_keeps_ltp() {
        let msg = FeedMessage::parse(&json!({
            "feeds": {
                "A": {"ltp": 10.0, "bar": {"ts": "yesterday", "open": 1, "high": 1, "low": 1, "close": 1, "volume": 1}},
                "B": {"ltp": 10.0, "bar": {"ts": "2025-01-02T09:20:00", "open": 10.0}},
                "C": {"ltp": 10.0, "bar": {"ts": "2025-01-02T09:20:00", "open": 10.0, "high": 9.0,
                      "low": 9.5, "close": 10.0, "volume": 5}}
            }
        }));
        assert_eq!(msg.updates.len(), 3);
        assert!(msg.updates.iter().all(|u| u.bar.is_none()));
    }

    #[test]
    fn test_not_a_feed() {
        assert!(FeedMessage::parse(&json!({"type": "heartbeat"})).is_empty());
        assert!(FeedMessage::from_json_str("{not json").is_err());
    }
}
