use thiserror::Error;

/// Failures reported by a venue (exchange or data provider) REST API.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{venue} API error {code}: {message}")]
    Api {
        venue: &'static str,
        code: i64,
        message: String,
    },

    #[error("{venue} returned a non-JSON body: {snippet}")]
    NonJson { venue: &'static str, snippet: String },

    #[error("{venue} response is missing `{field}`")]
    MissingField {
        venue: &'static str,
        field: &'static str,
    },

    #[error("{venue} request requires API credentials")]
    Unauthenticated { venue: &'static str },
}

impl ExchangeError {
    pub fn api(venue: &'static str, code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            venue,
            code,
            message: message.into(),
        }
    }

    pub fn non_json(venue: &'static str, body: &str) -> Self {
        Self::NonJson {
            venue,
            snippet: body.chars().take(120).collect(),
        }
    }

    pub fn missing(venue: &'static str, field: &'static str) -> Self {
        Self::MissingField { venue, field }
    }
}

/// Parse a JSON body, mapping HTML error pages to [`ExchangeError::NonJson`].
pub fn parse_json_body(venue: &'static str, body: &str) -> Result<serde_json::Value, ExchangeError> {
    let trimmed = body.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Err(ExchangeError::non_json(venue, body));
    }
    serde_json::from_str(trimmed).map_err(|_| ExchangeError::non_json(venue, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_body_is_non_json() {
        let err = parse_json_body("bybit", "<html>Not Found</html>").unwrap_err();
        assert!(matches!(err, ExchangeError::NonJson { venue: "bybit", .. }));
    }

    #[test]
    fn test_json_body_parses() {
        let value = parse_json_body("binance", r#"{"code":-1121,"msg":"Invalid symbol."}"#).unwrap();
        assert_eq!(value["code"], -1121);
    }

    #[test]
    fn test_api_error_display() {
        let err = ExchangeError::api("bybit", 10001, "params error");
        assert_eq!(err.to_string(), "bybit API error 10001: params error");
    }
}
