use envconfig::Envconfig;
use tokdir_docstore::StoreConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "HTTP_PORT", default = "8080")]
    pub http_port: u16,
    /// Maximum request body size in bytes
    #[envconfig(from = "MAX_PAYLOAD_BYTES", default = "65536")]
    pub max_payload_bytes: usize,
    /// Batch size used by `/api/tokens` when the query omits one
    #[envconfig(from = "DEFAULT_SCAN_BATCH", default = "500")]
    pub default_scan_batch: usize,
    #[envconfig(from = "STORE_MAX_DOCUMENT_BYTES", default = "1048576")]
    pub store_max_document_bytes: usize,
    #[envconfig(from = "STORE_MAX_ARRAY_LEN", default = "20000")]
    pub store_max_array_len: usize,
    // Optional: either "json" or "plain"/"text"
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl Config {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_max_document_bytes(self.store_max_document_bytes)
            .with_max_array_len(self.store_max_array_len)
    }

    pub fn json_logs(&self) -> bool {
        match self.log_format.as_deref().map(|s| s.to_ascii_lowercase()) {
            Some(ref v) if v == "json" || v == "structured" => true,
            _ => false,
        }
    }
}
