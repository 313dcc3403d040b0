//! Tick Normalizer
//!
//! Parses one feed envelope into validated trades with deterministic
//! idempotency keys. The envelope shape is
//! `{"type": "trade", "data": [{"s": .., "p": .., "v": .., "t": ..}, ..]}`.
//!
//! Prices and volumes are taken from their shortest textual form and parsed
//! as exact decimals; they never pass through floating-point arithmetic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::message::RawMessage;
use crate::domain::trade::{
    DroppedTick, IdempotencyKey, NormalizedTrade, TickRejection, TradeBatch, deltas_for,
};

/// Envelope type carrying trade ticks.
const TRADE_MESSAGE_TYPE: &str = "trade";

/// Successful normalization result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Not a trade message, or a trade message with no ticks.
    Skip {
        /// Declared envelope type.
        message_type: String,
    },
    /// At least one valid trade.
    Batch(TradeBatch),
}

/// Normalization failure. Neither variant can succeed on redelivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// The envelope itself is malformed.
    #[error("malformed envelope: {0}")]
    Parse(String),

    /// Every tick of a non-empty trade message was rejected.
    #[error("message contained trade data, but all {} ticks were invalid", .dropped.len())]
    AllTicksInvalid {
        /// Rejection for each tick.
        dropped: Vec<DroppedTick>,
    },
}

/// Normalize one raw message.
///
/// # Errors
///
/// Returns `NormalizeError::Parse` for a malformed envelope and
/// `NormalizeError::AllTicksInvalid` when no tick survives validation.
pub fn normalize(raw: &RawMessage) -> Result<NormalizeOutcome, NormalizeError> {
    let envelope: Value = serde_json::from_slice(raw.payload())
        .map_err(|e| NormalizeError::Parse(e.to_string()))?;

    let Value::Object(fields) = envelope else {
        return Err(NormalizeError::Parse("envelope is not an object".to_string()));
    };

    let message_type = match fields.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(_) => return Err(NormalizeError::Parse("'type' is not a string".to_string())),
        None => return Err(NormalizeError::Parse("missing 'type'".to_string())),
    };

    if message_type != TRADE_MESSAGE_TYPE {
        return Ok(NormalizeOutcome::Skip { message_type });
    }

    let ticks = match fields.get("data") {
        None | Some(Value::Null) => return Ok(NormalizeOutcome::Skip { message_type }),
        Some(Value::Array(ticks)) if ticks.is_empty() => {
            return Ok(NormalizeOutcome::Skip { message_type });
        }
        Some(Value::Array(ticks)) => ticks,
        Some(_) => return Err(NormalizeError::Parse("'data' is not an array".to_string())),
    };

    let mut trades = Vec::with_capacity(ticks.len());
    let mut dropped = Vec::new();

    for (index, tick) in ticks.iter().enumerate() {
        match parse_tick(raw, index, tick) {
            Ok(trade) => trades.push(trade),
            Err(reason) => {
                tracing::warn!(
                    stream = raw.stream(),
                    partition = raw.partition(),
                    offset = raw.offset(),
                    index,
                    reason = %reason,
                    "Dropping invalid tick"
                );
                dropped.push(DroppedTick { index, reason });
            }
        }
    }

    if trades.is_empty() {
        return Err(NormalizeError::AllTicksInvalid { dropped });
    }

    let deltas = deltas_for(&trades);
    Ok(NormalizeOutcome::Batch(TradeBatch {
        trades,
        deltas,
        dropped,
    }))
}

fn parse_tick(
    raw: &RawMessage,
    index: usize,
    tick: &Value,
) -> Result<NormalizedTrade, TickRejection> {
    let Value::Object(fields) = tick else {
        return Err(TickRejection::NotAnObject);
    };

    let symbol = match fields.get("s") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(TickRejection::MissingSymbol),
    };

    let (event_time_ms, event_time) = parse_event_time(fields)?;
    let price = parse_decimal(fields.get("p")).map_err(TickRejection::InvalidPrice)?;
    let volume = parse_decimal(fields.get("v")).map_err(TickRejection::InvalidVolume)?;

    let idempotency_key = IdempotencyKey::derive(
        raw.stream(),
        raw.partition(),
        raw.offset(),
        &symbol,
        event_time_ms,
        index,
    );

    Ok(NormalizedTrade {
        symbol,
        price,
        volume,
        event_time,
        idempotency_key,
    })
}

fn parse_event_time(fields: &Map<String, Value>) -> Result<(i64, DateTime<Utc>), TickRejection> {
    let value = fields
        .get("t")
        .ok_or_else(|| TickRejection::InvalidEventTime("missing".to_string()))?;

    let millis = value
        .as_i64()
        .ok_or_else(|| TickRejection::InvalidEventTime(value.to_string()))?;

    DateTime::from_timestamp_millis(millis)
        .map(|t| (millis, t))
        .ok_or_else(|| TickRejection::InvalidEventTime(format!("{millis} out of range")))
}

/// Parse a JSON number or numeric string as an exact, non-negative decimal.
fn parse_decimal(value: Option<&Value>) -> Result<Decimal, String> {
    let text = match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => return Err(format!("not numeric: {other}")),
        None => return Err("missing".to_string()),
    };

    let decimal = parse_exact(&text).ok_or_else(|| format!("not an exact decimal: {text}"))?;

    if decimal.is_sign_negative() && !decimal.is_zero() {
        return Err(format!("negative: {text}"));
    }

    Ok(decimal)
}

const MAX_SCALE: i64 = 28;

/// Parse plain or exponent notation without rounding; `None` when the
/// value has no exact 96-bit representation.
fn parse_exact(text: &str) -> Option<Decimal> {
    let Some((mantissa, exponent)) = text.split_once(['e', 'E']) else {
        return Decimal::from_str_exact(text).ok();
    };

    let mantissa = Decimal::from_str_exact(mantissa).ok()?.normalize();
    let exponent: i64 = exponent.parse().ok()?;
    if mantissa.is_zero() {
        return Some(Decimal::ZERO);
    }

    if exponent < 0 {
        let scale = u32::try_from(exponent.unsigned_abs()).ok()?;
        let mut value = mantissa;
        value.set_scale(value.scale().checked_add(scale)?).ok()?;
        Some(value)
    } else {
        // Any non-zero mantissa overflows well before this many shifts.
        if exponent > 2 * MAX_SCALE + 1 {
            return None;
        }
        (0..exponent).try_fold(mantissa, |value, _| value.checked_mul(Decimal::TEN))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn raw(payload: &str) -> RawMessage {
        RawMessage::new("t", 1, 42, payload.as_bytes().to_vec())
    }

    fn batch(outcome: NormalizeOutcome) -> TradeBatch {
        match outcome {
            NormalizeOutcome::Batch(batch) => batch,
            NormalizeOutcome::Skip { message_type } => panic!("unexpected skip: {message_type}"),
        }
    }

    #[test]
    fn normalizes_single_trade() {
        let msg = raw(
            r#"{"type":"trade","data":[{"s":"AAPL","p":150.75,"v":100.5,"t":1678886400123}]}"#,
        );
        let batch = batch(normalize(&msg).unwrap());

        assert_eq!(batch.trades.len(), 1);
        let trade = &batch.trades[0];
        assert_eq!(trade.idempotency_key.as_str(), "t-1-42-AAPL-1678886400123-0");
        assert_eq!(trade.price.to_string(), "150.75");
        assert_eq!(trade.volume.to_string(), "100.5");
        assert_eq!(trade.event_time_ms(), 1_678_886_400_123);

        assert_eq!(batch.deltas.len(), 1);
        let delta = batch.deltas["AAPL"];
        assert_eq!(delta.count, 1);
        assert_eq!(delta.max_event_time.timestamp_millis(), 1_678_886_400_123);
        assert!(batch.dropped.is_empty());
    }

    #[test_case(r#"{"type":"ping"}"# ; "ping")]
    #[test_case(r#"{"type":"news","data":[{"s":"AAPL"}]}"# ; "other type")]
    #[test_case(r#"{"type":"trade","data":[]}"# ; "empty data")]
    #[test_case(r#"{"type":"trade"}"# ; "missing data")]
    #[test_case(r#"{"type":"trade","data":null}"# ; "null data")]
    fn skips_messages_without_trades(payload: &str) {
        let outcome = normalize(&raw(payload)).unwrap();
        assert!(matches!(outcome, NormalizeOutcome::Skip { .. }));
    }

    #[test_case("not json" ; "not json")]
    #[test_case("[1,2,3]" ; "array envelope")]
    #[test_case(r#"{"data":[]}"# ; "missing type")]
    #[test_case(r#"{"type":7}"# ; "numeric type")]
    #[test_case(r#"{"type":"trade","data":{"s":"AAPL"}}"# ; "object data")]
    fn rejects_malformed_envelopes(payload: &str) {
        let err = normalize(&raw(payload)).unwrap_err();
        assert!(matches!(err, NormalizeError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn drops_only_the_bad_tick() {
        let msg = raw(
            r#"{"type":"trade","data":[
                {"s":"AAPL","p":1.5,"v":10,"t":1000},
                {"s":"AAPL","p":"abc","v":10,"t":2000},
                {"s":"MSFT","p":2.25,"v":3,"t":3000}
            ]}"#,
        );
        let batch = batch(normalize(&msg).unwrap());

        assert_eq!(batch.trades.len(), 2);
        assert_eq!(batch.dropped.len(), 1);
        assert_eq!(batch.dropped[0].index, 1);
        assert!(matches!(batch.dropped[0].reason, TickRejection::InvalidPrice(_)));

        let total: u64 = batch.deltas.values().map(|d| d.count).sum();
        assert_eq!(total, 2);
        assert_eq!(batch.deltas["AAPL"].count, 1);
        assert_eq!(batch.deltas["AAPL"].max_event_time.timestamp_millis(), 1000);

        // Surviving ticks keep their original positions in the key.
        assert!(batch.trades[1].idempotency_key.as_str().ends_with("-3000-2"));
    }

    #[test]
    fn all_invalid_ticks_is_an_error() {
        let msg = raw(
            r#"{"type":"trade","data":[{"s":"","p":1,"v":1,"t":1},{"s":"X","p":-1,"v":1,"t":1}]}"#,
        );
        let err = normalize(&msg).unwrap_err();
        let NormalizeError::AllTicksInvalid { dropped } = err else {
            panic!("expected AllTicksInvalid");
        };
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped[0].reason, TickRejection::MissingSymbol);
        assert!(matches!(dropped[1].reason, TickRejection::InvalidPrice(_)));
    }

    #[test_case(r#""150.75""#, "150.75" ; "numeric string")]
    #[test_case("100", "100" ; "integer")]
    #[test_case("0", "0" ; "zero")]
    #[test_case("1e-7", "0.0000001" ; "scientific small")]
    #[test_case("0.1", "0.1" ; "no float drift")]
    #[test_case(r#""0.1234567890123456789012345678""#, "0.1234567890123456789012345678" ; "28 fractional digits")]
    #[test_case(r#""25e-2""#, "0.25" ; "negative exponent")]
    fn accepts_exact_decimals(price: &str, expected: &str) {
        let msg = raw(&format!(
            r#"{{"type":"trade","data":[{{"s":"A","p":{price},"v":1,"t":5}}]}}"#
        ));
        let batch = batch(normalize(&msg).unwrap());
        assert_eq!(batch.trades[0].price.to_string(), expected);
    }

    #[test_case("-0.5" ; "negative")]
    #[test_case("1e30" ; "out of range")]
    #[test_case(r#""0.12345678901234567890123456789""# ; "29 fractional digits")]
    #[test_case("1e-40" ; "below smallest scale")]
    #[test_case(r#""1.00000000000000000000000000001e2""# ; "inexact mantissa")]
    #[test_case(r#""twelve""# ; "word")]
    #[test_case("true" ; "boolean")]
    #[test_case("null" ; "null")]
    fn rejects_inexact_prices(price: &str) {
        let msg = raw(&format!(
            r#"{{"type":"trade","data":[{{"s":"A","p":{price},"v":1,"t":5}}]}}"#
        ));
        assert!(matches!(
            normalize(&msg),
            Err(NormalizeError::AllTicksInvalid { .. })
        ));
    }

    #[test_case(r#"{"s":"A","p":1,"v":1}"# ; "missing time")]
    #[test_case(r#"{"s":"A","p":1,"v":1,"t":1.5}"# ; "fractional time")]
    #[test_case(r#"{"s":"A","p":1,"v":1,"t":"123"}"# ; "string time")]
    #[test_case(r#"{"p":1,"v":1,"t":1}"# ; "missing symbol")]
    #[test_case(r#"{"s":"A","p":1,"t":1}"# ; "missing volume")]
    #[test_case("42" ; "not an object")]
    fn rejects_incomplete_ticks(tick: &str) {
        let msg = raw(&format!(r#"{{"type":"trade","data":[{tick}]}}"#));
        assert!(matches!(
            normalize(&msg),
            Err(NormalizeError::AllTicksInvalid { .. })
        ));
    }

    fn tick_strategy() -> impl Strategy<Value = (String, u32, u32, i64)> {
        (
            "[A-Z]{1,5}(:[A-Z]{1,4})?",
            0u32..1_000_000,
            0u32..10_000,
            1i64..2_000_000_000_000,
        )
    }

    fn envelope(ticks: &[(String, u32, u32, i64)]) -> String {
        let data: Vec<String> = ticks
            .iter()
            .map(|(s, p, v, t)| format!(r#"{{"s":"{s}","p":{p},"v":{v},"t":{t}}}"#))
            .collect();
        format!(r#"{{"type":"trade","data":[{}]}}"#, data.join(","))
    }

    proptest! {
        #[test]
        fn keys_are_pairwise_distinct(
            ticks in prop::collection::vec(tick_strategy(), 1..40),
            offset in 0u64..1_000_000,
        ) {
            let msg = RawMessage::new("trades", 2, offset, envelope(&ticks).into_bytes());
            let batch = batch(normalize(&msg).unwrap());

            let keys: std::collections::HashSet<_> =
                batch.trades.iter().map(|t| t.idempotency_key.clone()).collect();
            prop_assert_eq!(keys.len(), ticks.len());
        }

        #[test]
        fn normalization_is_deterministic(
            ticks in prop::collection::vec(tick_strategy(), 1..20),
            partition in 0u32..16,
            offset in 0u64..1_000_000,
        ) {
            let msg = RawMessage::new("trades", partition, offset, envelope(&ticks).into_bytes());
            let first = normalize(&msg).unwrap();
            let second = normalize(&msg).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
