use crate::TradingMode;

/// Default Deriv application id for unregistered clients.
pub const DEFAULT_DERIV_APP_ID: &str = "1089";

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Broker
    pub deriv_app_id: String,
    /// Only required in live mode.
    pub deriv_api_token: Option<String>,
    /// Overrides the endpoint derived from the app id.
    pub deriv_ws_url: Option<String>,

    // Dashboard
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_tick_interval_ms: u64,
    pub paper_payout_ratio: f64,

    // Strategy roster file path
    pub strategy_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE").to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        let deriv_api_token = optional_env("DERIV_API_TOKEN").filter(|t| !t.trim().is_empty());
        if trading_mode == TradingMode::Live && deriv_api_token.is_none() {
            panic!("Required environment variable 'DERIV_API_TOKEN' is not set (needed for live mode).");
        }

        Config {
            deriv_app_id: optional_env("DERIV_APP_ID")
                .unwrap_or_else(|| DEFAULT_DERIV_APP_ID.to_string()),
            deriv_api_token,
            deriv_ws_url: optional_env("DERIV_WS_URL"),
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: optional_env("DASHBOARD_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            trading_mode,
            paper_tick_interval_ms: optional_env("PAPER_TICK_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            paper_payout_ratio: optional_env("PAPER_PAYOUT_RATIO")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.95),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
        }
    }

    /// WebSocket endpoint for the broker API.
    pub fn deriv_endpoint(&self) -> String {
        self.deriv_ws_url.clone().unwrap_or_else(|| {
            format!(
                "wss://ws.derivws.com/websockets/v3?app_id={}",
                self.deriv_app_id
            )
        })
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
