use std::time::Duration;

/// Parley API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Redis connection string (event bus and session store).
    pub redis_url: String,
    /// Key used to sign session cookies.
    pub secret: String,
    /// Cookie domain handed out by the login collaborator.
    pub domain: String,
    /// Allowed CORS origin. `None` allows any origin.
    pub cors_origin: Option<String>,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Per-request timeout for HTTP handlers.
    pub handler_timeout: Duration,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
    /// Credentials for the object-storage and mail collaborators. Carried
    /// through so one `.env` serves the whole process.
    pub aws: AwsConfig,
    pub gmail_user: Option<String>,
    pub gmail_password: Option<String>,
    /// Tunables for the realtime gateway.
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AwsConfig {
    pub access_key: Option<String>,
    pub secret_access_key: Option<String>,
    pub storage_bucket_name: Option<String>,
    pub region: Option<String>,
}

/// Timings and capacities for the websocket gateway and the hub.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How often the writer pings the client.
    pub ping_interval: Duration,
    /// How long the reader waits for a pong before giving up on the client.
    pub pong_wait: Duration,
    /// Deadline for a single socket write.
    pub write_wait: Duration,
    /// Capacity of each session's outbound queue.
    pub outbound_capacity: usize,
    /// Capacity of the hub's command intake.
    pub hub_capacity: usize,
    /// First delay before reconnecting to the event bus.
    pub bus_backoff_initial: Duration,
    /// Upper bound for the reconnect delay.
    pub bus_backoff_max: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            outbound_capacity: 256,
            hub_capacity: 1024,
            bus_backoff_initial: Duration::from_secs(1),
            bus_backoff_max: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/0".to_string()),
            secret: required_var("SECRET"),
            domain: std::env::var("DOMAIN").unwrap_or_else(|_| "localhost".to_string()),
            cors_origin: optional_var("CORS_ORIGIN"),
            port: parsed_var("PORT").unwrap_or(8080),
            handler_timeout: Duration::from_secs(parsed_var("HANDLER_TIMEOUT").unwrap_or(5)),
            max_body_bytes: parsed_var("MAX_BODY_BYTES").unwrap_or(4 * 1024 * 1024),
            aws: AwsConfig {
                access_key: optional_var("AWS_ACCESS_KEY"),
                secret_access_key: optional_var("AWS_SECRET_ACCESS_KEY"),
                storage_bucket_name: optional_var("AWS_STORAGE_BUCKET_NAME"),
                region: optional_var("AWS_S3_REGION"),
            },
            gmail_user: optional_var("GMAIL_USER"),
            gmail_password: optional_var("GMAIL_PASSWORD"),
            gateway: GatewayConfig::default(),
        }
    }

    /// Configuration for tests and local tooling: no external services are
    /// contacted until something actually connects to the URLs.
    pub fn for_tests(secret: &str) -> Self {
        Self {
            database_url: "postgres://localhost/parley_test".to_string(),
            redis_url: "redis://localhost:6379/15".to_string(),
            secret: secret.to_string(),
            domain: "localhost".to_string(),
            cors_origin: None,
            port: 0,
            handler_timeout: Duration::from_secs(5),
            max_body_bytes: 4 * 1024 * 1024,
            aws: AwsConfig::default(),
            gmail_user: None,
            gmail_password: None,
            gateway: GatewayConfig::default(),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
