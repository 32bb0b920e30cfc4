use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct BybitAuth {
    api_key: String,
    api_secret: String,
}

impl BybitAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self { api_key, api_secret }
    }

    pub fn get_api_key(&self) -> &str {
        &self.api_key
    }

    /// v5 signature: hex(HMAC_SHA256(secret, timestamp + api_key + recv_window + payload)).
    ///
    /// `payload` is the query string for GET and the raw JSON body for POST.
    pub fn generate_signature(&self, timestamp: u64, recv_window: u64, payload: &str) -> String {
        let sign_str = format!("{}{}{}{}", timestamp, &self.api_key, recv_window, payload);

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");

        mac.update(sign_str.as_bytes());

        hex::encode(mac.finalize().into_bytes())
    }

    /// Current timestamp in milliseconds
    pub fn get_timestamp() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }
}
