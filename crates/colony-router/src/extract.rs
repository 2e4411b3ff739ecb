use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use colony_types::ParamExtractor;

fn ticker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z]+)").expect("static pattern"))
}

fn symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(btc|eth|sol|strk|avax|matic|ldo|crv|aave)\b").expect("static pattern")
    })
}

fn query_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(what is|research|search|find|news about)\b").expect("static pattern"))
}

/// Best-effort skill parameters. Extraction can find nothing but can never
/// fail routing; the raw message always rides along.
pub fn extract_params(extractor: ParamExtractor, text: &str) -> HashMap<String, Value> {
    let mut params = HashMap::new();
    params.insert("raw_message".to_string(), Value::String(text.to_string()));

    match extractor {
        ParamExtractor::None => {}
        ParamExtractor::TokenSymbols => {
            let mut tokens: Vec<String> = ticker_re()
                .captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_uppercase())
                .chain(
                    symbol_re()
                        .captures_iter(&text.to_lowercase())
                        .filter_map(|c| c.get(1).map(|m| m.as_str().to_uppercase())),
                )
                .collect();
            tokens.sort();
            tokens.dedup();
            params.insert("tokens".to_string(), json!(tokens));
            params.insert("action".to_string(), json!("check"));
        }
        ParamExtractor::TrailingQuery => {
            let query = query_prefix_re().replace_all(text, "");
            params.insert("query".to_string(), json!(query.trim()));
            params.insert("action".to_string(), json!("search"));
        }
        ParamExtractor::Topic => {
            let format = if text.to_lowercase().contains("tweet") {
                "tweet"
            } else if text.to_lowercase().contains("thread") {
                "thread"
            } else {
                "post"
            };
            params.insert("topic".to_string(), json!(text));
            params.insert("format".to_string(), json!(format));
            params.insert("action".to_string(), json!("generate"));
        }
        ParamExtractor::Text => {
            params.insert("text".to_string(), json!(text));
            params.insert("action".to_string(), json!("edit"));
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_symbols_are_uppercased_and_deduped() {
        let params = extract_params(ParamExtractor::TokenSymbols, "swap $ETH for eth or btc");
        let tokens = params.get("tokens").unwrap();
        assert_eq!(tokens, &json!(["BTC", "ETH"]));
    }

    #[test]
    fn trailing_query_strips_lead_in() {
        let params = extract_params(ParamExtractor::TrailingQuery, "what is restaking");
        assert_eq!(params.get("query").unwrap(), &json!("restaking"));
    }

    #[test]
    fn topic_detects_tweet_format() {
        let params = extract_params(ParamExtractor::Topic, "write a tweet about fees");
        assert_eq!(params.get("format").unwrap(), &json!("tweet"));
    }

    #[test]
    fn raw_message_always_present() {
        for extractor in [
            ParamExtractor::None,
            ParamExtractor::TokenSymbols,
            ParamExtractor::TrailingQuery,
            ParamExtractor::Topic,
            ParamExtractor::Text,
        ] {
            let params = extract_params(extractor, "hello");
            assert_eq!(params.get("raw_message").unwrap(), &json!("hello"));
        }
    }
}
