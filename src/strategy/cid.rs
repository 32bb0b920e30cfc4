use once_cell::sync::Lazy;
use regex::Regex;

use super::Direction;

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>|[*_`]").expect("valid regex"));
static ON_NOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ON\s+([A-Z0-9]+USDT).*NOW[:\s]+(BULLISH|BEARISH)").expect("valid regex"));
static ANY_SYMBOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)([A-Z0-9]+USDT)").expect("valid regex"));
static ANY_DIRECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(BULLISH|BEARISH)\b").expect("valid regex"));

const MARKER: &str = "CONFIRMED CHANGE IN DIRECTION";

/// A "Confirmed Change in Direction" call for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidSignal {
    pub symbol: String,
    pub direction: Direction,
}

/// Extract a CID signal from message text, ignoring HTML/Markdown markup.
///
/// Prefers `on <SYM>USDT ... Now <DIRECTION>`; otherwise takes the first
/// `<SYM>USDT` and the first direction word anywhere in the text.
pub fn parse_cid(text: &str) -> Option<CidSignal> {
    let plain = MARKUP.replace_all(text, "");
    if !plain.to_uppercase().contains(MARKER) {
        return None;
    }

    let (symbol, direction) = match ON_NOW.captures(&plain) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => {
            let symbol = ANY_SYMBOL.captures(&plain)?[1].to_string();
            let direction = ANY_DIRECTION.captures(&plain)?[1].to_string();
            (symbol, direction)
        }
    };

    Some(CidSignal {
        symbol: symbol.to_uppercase(),
        direction: direction.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_markdown_text() {
        let text = "🔁 *Confirmed Change in Direction* on *BTCUSDT* *(30m)*: Now *BULLISH* 🟢";
        assert_eq!(
            parse_cid(text),
            Some(CidSignal {
                symbol: "BTCUSDT".to_string(),
                direction: Direction::Bullish
            })
        );
    }

    #[test]
    fn test_html_and_strong_variant() {
        let text = "🔁 <b>Confirmed Change in Direction (Strong)</b> on <b>solusdt</b> <b>(30m)</b>: Now <b>BEARISH</b> 🔴\n🫧 Liquidity Sweep: <b>Upside</b> (15m)";
        let cid = parse_cid(text).unwrap();
        assert_eq!(cid.symbol, "SOLUSDT");
        assert_eq!(cid.direction, Direction::Bearish);
    }

    #[test]
    fn test_fallback_pattern() {
        let text = "CONFIRMED CHANGE IN DIRECTION\nPair: ETHUSDT\nbias bearish";
        let cid = parse_cid(text).unwrap();
        assert_eq!(cid.symbol, "ETHUSDT");
        assert_eq!(cid.direction, Direction::Bearish);
    }

    #[test]
    fn test_rejects_other_messages() {
        assert_eq!(parse_cid("Potential Change in Direction on BTCUSDT: Now BULLISH"), None);
        assert_eq!(parse_cid("Confirmed change in direction, no pair here: BULLISH"), None);
        assert_eq!(parse_cid("Confirmed change in direction on XRPUSDT"), None);
    }
}
