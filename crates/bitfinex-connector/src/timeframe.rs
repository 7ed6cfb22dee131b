/*
[INPUT]:  Candle aggregation period in seconds
[OUTPUT]: Exchange timeframe token ("1m", "1h", "1D", ...) and candle channel keys
[POS]:    Shared leaf - used by the REST fetcher and the streaming client
[UPDATE]: When the exchange adds or retires candle timeframes
*/

use crate::error::{ConnectorError, Result};

/// Every candle period the exchange serves, in seconds, with its token.
pub const TIMEFRAMES: [(i64, &str); 11] = [
    (60, "1m"),
    (300, "5m"),
    (900, "15m"),
    (1_800, "30m"),
    (3_600, "1h"),
    (10_800, "3h"),
    (21_600, "6h"),
    (43_200, "12h"),
    (86_400, "1D"),
    (604_800, "7D"),
    (2_592_000, "1M"),
];

const CANDLE_KEY_PREFIX: &str = "trade";

/// Token for a candle period. Any integer outside the fixed table, negative
/// values included, is an `UnsupportedPeriod`.
pub fn seconds_to_timeframe(seconds: i64) -> Result<&'static str> {
    TIMEFRAMES
        .iter()
        .find(|(period, _)| *period == seconds)
        .map(|(_, token)| *token)
        .ok_or(ConnectorError::UnsupportedPeriod { seconds })
}

pub fn timeframe_to_seconds(token: &str) -> Option<i64> {
    TIMEFRAMES
        .iter()
        .find(|(_, candidate)| *candidate == token)
        .map(|(period, _)| *period)
}

/// Candle channel key, `trade:<timeframe>:<symbol>`.
pub fn candle_key(timeframe: &str, symbol: &str) -> String {
    format!("{CANDLE_KEY_PREFIX}:{timeframe}:{symbol}")
}

/// Split a candle channel key back into `(timeframe, symbol)`.
///
/// Symbols may themselves contain `:` (`tTESTBTC:TESTUSD`), so everything
/// after the timeframe is the symbol.
pub fn parse_candle_key(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.splitn(3, ':');
    if parts.next()? != CANDLE_KEY_PREFIX {
        return None;
    }
    let timeframe = parts.next().filter(|tf| !tf.is_empty())?;
    let symbol = parts.next().filter(|symbol| !symbol.is_empty())?;
    Some((timeframe, symbol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(60, "1m")]
    #[case(300, "5m")]
    #[case(900, "15m")]
    #[case(1800, "30m")]
    #[case(3600, "1h")]
    #[case(10800, "3h")]
    #[case(21600, "6h")]
    #[case(43200, "12h")]
    #[case(86400, "1D")]
    #[case(604800, "7D")]
    #[case(2592000, "1M")]
    fn maps_supported_periods(#[case] seconds: i64, #[case] token: &str) {
        assert_eq!(seconds_to_timeframe(seconds).expect("supported"), token);
        assert_eq!(timeframe_to_seconds(token), Some(seconds));
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(59)]
    #[case(120)]
    #[case(7200)]
    #[case(-60)]
    #[case(-1)]
    #[case(i64::from(u32::MAX))]
    #[case(i64::MAX)]
    #[case(i64::MIN)]
    fn rejects_other_periods(#[case] seconds: i64) {
        match seconds_to_timeframe(seconds) {
            Err(ConnectorError::UnsupportedPeriod { seconds: reported }) => {
                assert_eq!(reported, seconds)
            }
            other => panic!("expected UnsupportedPeriod, got {other:?}"),
        }
    }

    #[test]
    fn candle_key_round_trip() {
        let key = candle_key("1h", "tBTCUSD");
        assert_eq!(key, "trade:1h:tBTCUSD");
        assert_eq!(parse_candle_key(&key), Some(("1h", "tBTCUSD")));
        assert_eq!(
            parse_candle_key("trade:1m:tTESTBTC:TESTUSD"),
            Some(("1m", "tTESTBTC:TESTUSD"))
        );
    }

    #[test]
    fn parse_candle_key_rejects_foreign_keys() {
        assert_eq!(parse_candle_key("funding:1h:fUSD"), None);
        assert_eq!(parse_candle_key("trade:1h"), None);
        assert_eq!(parse_candle_key("trade::tBTCUSD"), None);
    }
}
