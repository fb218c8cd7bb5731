//! Crypto price tool: CoinGecko `simple/price` lookups.

use async_trait::async_trait;
use cortex_core::error::ToolError;
use cortex_core::tool::{Tool, ToolCall, ToolKind, ToolResult};
use tracing::debug;

pub struct CryptoPriceTool {
    client: reqwest::Client,
    base_url: String,
    vs_currency: String,
}

impl CryptoPriceTool {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        vs_currency: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            vs_currency: vs_currency.into().to_lowercase(),
        }
    }
}

/// Map tickers and common names to CoinGecko coin ids.
pub fn coin_id(asset: &str) -> String {
    let normalized = asset.trim().to_lowercase();
    let id = match normalized.as_str() {
        "btc" | "xbt" => "bitcoin",
        "eth" | "ether" => "ethereum",
        "sol" => "solana",
        "doge" => "dogecoin",
        "ada" => "cardano",
        "xrp" => "ripple",
        "bnb" => "binancecoin",
        "dot" => "polkadot",
        "ltc" => "litecoin",
        "avax" => "avalanche-2",
        "link" => "chainlink",
        "matic" | "polygon" => "matic-network",
        "trx" => "tron",
        "usdt" => "tether",
        "usdc" => "usd-coin",
        other => return other.replace(' ', "-"),
    };
    id.to_string()
}

fn format_price(price: f64) -> String {
    if price >= 1.0 {
        format!("{price:.2}")
    } else {
        format!("{price:.6}")
    }
}

#[async_trait]
impl Tool for CryptoPriceTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CryptoPrice
    }

    fn description(&self) -> &str {
        "Get the current price of a cryptocurrency by name or ticker (e.g. bitcoin, ETH)."
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let ToolCall::CryptoPrice { asset } = call else {
            return Err(ToolError::InvalidArguments(format!(
                "crypto_price cannot handle {}",
                call.kind()
            )));
        };

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "crypto_price".into(),
            reason,
        };

        let id = coin_id(asset);
        let url = format!("{}/simple/price", self.base_url);
        debug!(asset = %asset, id = %id, "Fetching crypto price");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("ids", id.as_str()),
                ("vs_currencies", self.vs_currency.as_str()),
                ("include_24hr_change", "true"),
            ])
            .send()
            .await
            .map_err(|e| failed(format!("price request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(failed(format!("price lookup failed: {}", response.status())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| failed(format!("invalid price response: {e}")))?;

        let entry = &body[id.as_str()];
        let Some(price) = entry[self.vs_currency.as_str()].as_f64() else {
            return Err(failed(format!("unknown asset '{asset}'")));
        };

        let currency = self.vs_currency.to_uppercase();
        let mut output = format!("{id}: {} {currency}", format_price(price));
        if let Some(change) = entry[format!("{}_24h_change", self.vs_currency)].as_f64() {
            output.push_str(&format!(" ({change:+.2}% in 24h)"));
        }

        Ok(ToolResult::ok(output).with_data(entry.clone()))
    }
}
