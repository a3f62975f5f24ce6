use anyhow::Context;
use std::io::Read;

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bind_address: String,
    pub bind_port: u16,
    pub database: glucose_db::Config,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PaginationConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UploadConfig {
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdminConfig {
    pub enabled: bool,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TracingConfig {
    pub filter: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info,tower_http=debug".to_owned(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    let mut configuration = String::with_capacity(4096);
    std::fs::File::open("./app-config.toml")
        .context("unable to open configuration file ./app-config.toml")?
        .read_to_string(&mut configuration)
        .context("unable to read configuration file ./app-config.toml")?;
    let mut config = parse(&configuration)?;
    if let Ok(db_url) = std::env::var("DATABASE_URL") {
        config.database.db_url = db_url;
    }
    if let Ok(bind_address) = std::env::var("GLUCOSE_BIND_ADDRESS") {
        config.bind_address = bind_address;
    }
    if let Ok(bind_port) = std::env::var("GLUCOSE_BIND_PORT") {
        config.bind_port = bind_port
            .parse()
            .context("GLUCOSE_BIND_PORT is not a valid port number")?;
    }
    Ok(config)
}

fn parse(configuration: &str) -> anyhow::Result<Config> {
    toml::from_str::<Config>(configuration)
        .context("unable to parse configuration file ./app-config.toml")
}
