//! config-rs/lib.rs
//! Shared configuration utilities for the gateway process
//! Provides standardized functions for port/address management and `.env` loading

use std::env;
use std::net::{Ipv4Addr, SocketAddr};

/// Load a `.env` file from the working directory or its parents
///
/// A missing file is not an error; the process environment is used as is.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => log::info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => log::debug!("No .env file found, using process environment"),
        Err(e) => log::warn!("Failed to load .env file: {}", e),
    }
}

/// Get service port from environment variables with proper fallback
///
/// Checks `<SERVICE>_SERVICE_PORT`, then the hosting platform's `PORT`,
/// then falls back to `default_port`.
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "GATEWAY")
/// * `default_port` - The default port to use if not specified in environment
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", service_name.to_uppercase());

    for name in [var_name.as_str(), "PORT"] {
        if let Ok(value) = env::var(name) {
            match value.trim().parse::<u16>() {
                Ok(port) => return port,
                Err(_) => log::warn!("Invalid port {:?} in {}, ignoring", value, name),
            }
        }
    }

    default_port
}

/// Create a SocketAddr for binding a service
///
/// `<SERVICE>_SERVICE_ADDR` overrides everything and may be given as
/// `host:port` or `http://host:port`. Otherwise binds all interfaces on the
/// port from `get_service_port`.
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", service_name.to_uppercase());

    if let Ok(addr_str) = env::var(&var_name) {
        let trimmed = addr_str
            .strip_prefix("http://")
            .or_else(|| addr_str.strip_prefix("https://"))
            .unwrap_or(&addr_str);

        match trimmed.parse::<SocketAddr>() {
            Ok(addr) => return addr,
            Err(_) => log::warn!("Invalid address format in {}, using default", var_name),
        }
    }

    let port = get_service_port(service_name, default_port);
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own service name; the process environment is shared.

    #[test]
    fn test_get_service_port() {
        std::env::set_var("PORTTEST_SERVICE_PORT", "9000");
        assert_eq!(get_service_port("porttest", 8000), 9000);

        // An unparsable service port falls through to PORT, then the default.
        std::env::set_var("BADPORT_SERVICE_PORT", "not-a-port");
        let expected = std::env::var("PORT")
            .ok()
            .and_then(|value| value.trim().parse::<u16>().ok())
            .unwrap_or(8000);
        assert_eq!(get_service_port("BADPORT", 8000), expected);

        std::env::set_var("TOOBIG_SERVICE_PORT", "70000");
        assert_eq!(get_service_port("TOOBIG", 8000), expected);
    }

    #[test]
    fn test_get_bind_address() {
        std::env::set_var("ADDRTEST_SERVICE_ADDR", "127.0.0.1:7001");
        assert_eq!(get_bind_address("ADDRTEST", 8000), "127.0.0.1:7001".parse().unwrap());

        std::env::set_var("URLTEST_SERVICE_ADDR", "http://127.0.0.1:7002");
        assert_eq!(get_bind_address("URLTEST", 8000), "127.0.0.1:7002".parse().unwrap());

        std::env::set_var("PORTONLY_SERVICE_PORT", "7003");
        assert_eq!(get_bind_address("PORTONLY", 8000), "0.0.0.0:7003".parse().unwrap());
    }
}
