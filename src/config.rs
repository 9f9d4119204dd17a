use clap::Args as ClapArgs;

const DEFAULT_API_URL: &str = "https://api.pinterest.com/v5";
const DEFAULT_TOKEN_URL: &str = "https://api.pinterest.com/v5/oauth/token";
const DEFAULT_SHEETS_API_URL: &str = "https://sheets.googleapis.com";
const DEFAULT_TOKEN_FILE: &str = "./pinterest_tokens.json";
const DEFAULT_SHEET_TAB: &str = "Paid Metrics By Country";
const STORE_DIR: &str = "./";

#[derive(ClapArgs)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "PINTEREST_API_URL")]
    pub(crate) api_url: String,

    #[arg(long, env = "PINTEREST_AD_ACCOUNT_ID")]
    pub(crate) ad_account_id: String,

    #[arg(long, default_value = DEFAULT_TOKEN_FILE, env = "PINTEREST_TOKEN_FILE")]
    pub(crate) token_file: String,

    #[arg(long, default_value = DEFAULT_TOKEN_URL, env = "PINTEREST_TOKEN_URL")]
    pub(crate) token_url: String,

    #[arg(long, env = "PINTEREST_CLIENT_ID")]
    pub(crate) client_id: Option<String>,

    #[arg(long, env = "PINTEREST_CLIENT_SECRET")]
    pub(crate) client_secret: Option<String>,

    #[arg(long, default_value = STORE_DIR, env = "STORE_DIR")]
    pub(crate) store_dir: String,

    #[arg(long, default_value = DEFAULT_SHEETS_API_URL, env = "SHEETS_API_URL")]
    pub(crate) sheets_api_url: String,

    #[arg(long, env = "GOOGLE_SHEET_ID")]
    pub(crate) sheet_id: Option<String>,

    #[arg(long, default_value = DEFAULT_SHEET_TAB, env = "GOOGLE_SHEET_TAB")]
    pub(crate) sheet_tab: String,

    #[arg(long, env = "GOOGLE_SHEETS_TOKEN")]
    pub(crate) sheets_token: Option<String>,

    #[arg(long, default_value_t = 50, env = "MAX_PINS")]
    pub(crate) max_pins: u32,

    #[arg(long, default_value = "IMPRESSION", env = "SORT_METRIC")]
    pub(crate) sort_metric: String,

    #[arg(long, default_value_t = 1000, env = "REQUEST_PAUSE_MS")]
    pub(crate) request_pause_ms: u64,
}

#[cfg(test)]
impl Config {
    pub(crate) fn test_default() -> Self {
        Config {
            api_url: "https://api.example.com".to_string(),
            ad_account_id: "123".to_string(),
            token_file: "./pinterest_tokens.json".to_string(),
            token_url: "https://api.example.com/oauth/token".to_string(),
            client_id: None,
            client_secret: None,
            store_dir: "./".to_string(),
            sheets_api_url: "https://sheets.example.com".to_string(),
            sheet_id: None,
            sheet_tab: "Paid Metrics By Country".to_string(),
            sheets_token: None,
            max_pins: 50,
            sort_metric: "IMPRESSION".to_string(),
            request_pause_ms: 0,
        }
    }
}
