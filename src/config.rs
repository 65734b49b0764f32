use std::env;

/// Which catalog backend the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Mssql,
    Memory,
}

/// How the service authenticates against SQL Server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlAuth {
    /// SQL login (`UID`/`PWD`).
    Password,
    /// Pre-acquired Entra ID access token, used for Fabric warehouses.
    AadToken(String),
}

#[derive(Debug, Clone)]
pub struct SqlConfig {
    pub server: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub auth: SqlAuth,
    pub trust_cert: bool,
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_base: String,
    pub folder: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub store: StoreKind,
    pub sql: SqlConfig,
    pub cloudinary: CloudinaryConfig,
    pub cors_origins: Vec<String>,
    pub max_image_bytes: usize,
    pub body_limit: usize,
    pub allow_private_urls: bool,
    pub dev_mode: bool,
}

fn parse_cors_origins(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_store_kind(s: &str) -> StoreKind {
    if s.eq_ignore_ascii_case("memory") {
        StoreKind::Memory
    } else {
        StoreKind::Mssql
    }
}

/// First set variable among `keys`, so `AZURE_SQL_*` wins over `FABRIC_*`.
fn var_any(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env::var(k).ok())
}

fn flag(key: &str) -> bool {
    env::var(key).ok().is_some_and(|v| v == "true")
}

impl Config {
    pub fn load() -> Self {
        let auth = match env::var("CARUPLOAD_SQL_AUTH").as_deref() {
            Ok("aad-token") => SqlAuth::AadToken(env::var("CARUPLOAD_SQL_TOKEN").unwrap_or_default()),
            _ => SqlAuth::Password,
        };

        Self {
            listen: env::var("CARUPLOAD_LISTEN").unwrap_or_else(|_| "0.0.0.0:5000".into()),
            store: env::var("CARUPLOAD_STORE")
                .map_or(StoreKind::Mssql, |v| parse_store_kind(&v)),
            sql: SqlConfig {
                server: var_any(&["AZURE_SQL_SERVER", "FABRIC_SERVER"])
                    .unwrap_or_else(|| "localhost".into()),
                port: env::var("CARUPLOAD_SQL_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1433),
                database: var_any(&["AZURE_SQL_DATABASE", "FABRIC_DATABASE"])
                    .unwrap_or_else(|| "car_rent".into()),
                user: var_any(&["AZURE_SQL_USER", "FABRIC_USER"]).unwrap_or_default(),
                password: var_any(&["AZURE_SQL_PASSWORD", "FABRIC_PASSWORD"]).unwrap_or_default(),
                auth,
                trust_cert: flag("CARUPLOAD_SQL_TRUST_CERT"),
            },
            cloudinary: CloudinaryConfig {
                cloud_name: env::var("CLOUDINARY_CLOUD_NAME").unwrap_or_default(),
                api_key: env::var("CLOUDINARY_API_KEY").unwrap_or_default(),
                api_secret: env::var("CLOUDINARY_API_SECRET").unwrap_or_default(),
                api_base: env::var("CLOUDINARY_API_BASE")
                    .unwrap_or_else(|_| "https://api.cloudinary.com".into()),
                folder: env::var("CLOUDINARY_FOLDER").ok().filter(|f| !f.is_empty()),
            },
            cors_origins: env::var("CARUPLOAD_CORS_ORIGINS")
                .ok()
                .map_or_else(Vec::new, |v| parse_cors_origins(&v)),
            max_image_bytes: env::var("CARUPLOAD_MAX_IMAGE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20 * 1024 * 1024),
            body_limit: env::var("CARUPLOAD_BODY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100 * 1024 * 1024),
            allow_private_urls: flag("CARUPLOAD_ALLOW_PRIVATE_URLS"),
            dev_mode: flag("CARUPLOAD_DEV"),
        }
    }

    /// Port component of the listen address, if it has one.
    pub fn listen_port(&self) -> Option<u16> {
        self.listen.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
    }
}
