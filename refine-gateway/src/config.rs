use r2e_macros::ConfigProperties;

#[derive(Clone, Debug, ConfigProperties)]
#[config(prefix = "engine")]
pub struct EngineConfig {
    /// Base URL of the refinement engine (scheme dictates the `stream` transport).
    pub base_url: String,
}

#[derive(Clone, Debug, ConfigProperties)]
#[config(prefix = "auth")]
pub struct AuthConfig {
    /// HMAC signing secret for minted/verified tokens. Missing at startup is fatal.
    pub signing_secret: String,
    #[config(default = 3600)]
    pub default_ttl: i64,
}

#[derive(Clone, Debug, ConfigProperties)]
#[config(prefix = "breaker")]
pub struct BreakerConfig {
    #[config(default = 5)]
    pub consecutive_failure_threshold: u32,
    #[config(default = 30)]
    pub open_dwell_secs: u64,
    #[config(default = 3)]
    pub half_open_trials: u32,
}

#[derive(Clone, Debug, ConfigProperties)]
#[config(prefix = "http")]
pub struct HttpConfig {
    #[config(default = 8080)]
    pub listen_port: u16,
    #[config(default = 30)]
    pub read_timeout: u64,
    #[config(default = 30)]
    pub write_timeout: u64,
    #[config(default = 60)]
    pub idle_timeout: u64,
}

#[derive(Clone, Debug, ConfigProperties)]
#[config(prefix = "cors")]
pub struct CorsConfig {
    #[config(default = Vec::new())]
    pub allowed_origins: Vec<String>,
}

#[derive(Clone, Debug, ConfigProperties)]
#[config(prefix = "db")]
pub struct DbConfig {
    pub url: String,
}

/// Every configuration section the gateway recognizes, loaded independently
/// from the top-level keys named in the persistence/configuration surface
/// (`engine.*`, `auth.*`, `breaker.*`, `http.*`, `cors.*`, `db.*`) — each
/// section keeps its own prefix rather than nesting under a common parent,
/// since the recognized keys are flat, not namespaced under `app`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub auth: AuthConfig,
    pub breaker: BreakerConfig,
    pub http: HttpConfig,
    pub cors: CorsConfig,
    pub db: DbConfig,
}

impl AppConfig {
    pub fn from_config(config: &r2e_core::R2eConfig) -> Result<Self, r2e_core::ConfigError> {
        Ok(Self {
            engine: EngineConfig::from_config(config)?,
            auth: AuthConfig::from_config(config)?,
            breaker: BreakerConfig::from_config(config)?,
            http: HttpConfig::from_config(config)?,
            cors: CorsConfig::from_config(config)?,
            db: DbConfig::from_config(config)?,
        })
    }
}
