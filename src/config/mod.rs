use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server and upload pipeline configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: "127.0.0.1")
    pub host: String,

    /// Listen port (default: 3000)
    pub port: u16,

    /// Destination root for uploaded files (default: "downloads")
    pub downloads_folder: PathBuf,

    /// Minimum gap between two progress events for one file (default: 200 ms)
    pub progress_interval_ms: u64,

    /// Body chunks buffered between the decoder and a part pipeline (default: 4)
    pub part_channel_capacity: usize,

    /// Largest accepted part header block in bytes (default: 8 KB)
    pub max_header_bytes: usize,

    /// Largest accepted request body in bytes (default: 2 GB)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            downloads_folder: PathBuf::from("downloads"),
            progress_interval_ms: 200,
            part_channel_capacity: 4,
            max_header_bytes: 8 * 1024,
            max_body_size: 2usize << 30, // 2 GB
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            host: env::var("HOST").unwrap_or(default.host),

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),

            downloads_folder: env::var("DOWNLOADS_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.downloads_folder),

            progress_interval_ms: env::var("PROGRESS_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.progress_interval_ms),

            part_channel_capacity: env::var("PART_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.part_channel_capacity),

            max_header_bytes: env::var("MAX_HEADER_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_header_bytes),

            max_body_size: env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_body_size),
        }
    }

    /// Create config for development (local temp folder, chattier progress)
    pub fn development() -> Self {
        Self {
            downloads_folder: env::temp_dir().join("streaming-upload-backend"),
            progress_interval_ms: 100,
            ..Self::default()
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
