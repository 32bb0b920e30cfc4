use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct BinanceAuth {
    api_key: String,
    api_secret: String,
}

impl BinanceAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self { api_key, api_secret }
    }

    pub fn get_api_key(&self) -> &str {
        &self.api_key
    }

    /// USER_DATA signature: hex(HMAC_SHA256(secret, query_string)).
    ///
    /// The query string must already carry `timestamp` and `recvWindow`.
    pub fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn get_timestamp() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }
}
