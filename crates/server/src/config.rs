use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub environment: String,
    pub auth_secret: String,
    pub auth_token_ttl_seconds: i64,
    pub admin_username: String,
    pub admin_password: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            database_url: "sqlite://./data/orders.db".into(),
            environment: "development".into(),
            auth_secret: "dev-secret-change-me".into(),
            auth_token_ttl_seconds: 8 * 3600,
            admin_username: "admin".into(),
            admin_password: "admin".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.bind_addr = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("environment") {
                settings.environment = v.clone();
            }
            if let Some(v) = file_cfg.get("auth_secret") {
                settings.auth_secret = v.clone();
            }
            if let Some(v) = file_cfg.get("auth_token_ttl_seconds") {
                if let Ok(parsed) = v.parse::<i64>() {
                    settings.auth_token_ttl_seconds = parsed;
                }
            }
            if let Some(v) = file_cfg.get("admin_username") {
                settings.admin_username = v.clone();
            }
            if let Some(v) = file_cfg.get("admin_password") {
                settings.admin_password = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.bind_addr = v;
    }
    // container convention: PORT overrides only the port of the bind address
    if let Ok(v) = std::env::var("PORT") {
        if let Ok(port) = v.parse::<u16>() {
            let host = settings
                .bind_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            settings.bind_addr = format!("{host}:{port}");
        }
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP_ENVIRONMENT") {
        settings.environment = v;
    }
    if let Ok(v) = std::env::var("AUTH_SECRET") {
        settings.auth_secret = v;
    }
    if let Ok(v) = std::env::var("AUTH_TOKEN_TTL_SECONDS") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.auth_token_ttl_seconds = parsed;
        }
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
