use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub curriculum_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let curriculum_dir = std::env::var("CURRICULUM_DIR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Self {
            host,
            port,
            log_level,
            curriculum_dir,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("1" | "true" | "yes" | "y" | "on") => true,
        Some("0" | "false" | "no" | "n" | "off") => false,
        _ => default,
    }
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_env_values_fall_back_on_garbage() {
        std::env::set_var("LINGO_TEST_ENV_F64", "not-a-number");
        assert_eq!(env_f64("LINGO_TEST_ENV_F64", 1.5), 1.5);
        std::env::set_var("LINGO_TEST_ENV_F64", "inf");
        assert_eq!(env_f64("LINGO_TEST_ENV_F64", 1.5), 1.5);
        std::env::set_var("LINGO_TEST_ENV_F64", " 2.25 ");
        assert_eq!(env_f64("LINGO_TEST_ENV_F64", 1.5), 2.25);
    }

    #[test]
    fn env_bool_accepts_common_spellings() {
        std::env::set_var("LINGO_TEST_ENV_BOOL", "On");
        assert!(env_bool("LINGO_TEST_ENV_BOOL", false));
        std::env::set_var("LINGO_TEST_ENV_BOOL", "0");
        assert!(!env_bool("LINGO_TEST_ENV_BOOL", true));
        std::env::remove_var("LINGO_TEST_ENV_BOOL");
        assert!(env_bool("LINGO_TEST_ENV_BOOL", true));
    }
}
