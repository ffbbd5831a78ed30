//! Broadcast proxy program options.

use std::path::{Path, PathBuf};

use ini::Ini;

#[derive(Debug, Clone)]
pub struct ProgramOptions {
    pub frontend_address: String,
    pub backend_address: String,
    pub send_high_water_mark: i32,
    /// Stonehouse server keypair file; absent means a Grasslands bus.
    pub server_key_file: Option<PathBuf>,
    /// Known-peer public key file consulted by the Stonehouse policy.
    pub peers_file: Option<PathBuf>,
    pub verbosity: i32,
}

impl Default for ProgramOptions {
    fn default() -> ProgramOptions {
        ProgramOptions {
            frontend_address: "tcp://127.0.0.1:5550".to_string(),
            backend_address: "tcp://127.0.0.1:5551".to_string(),
            send_high_water_mark: 4096,
            server_key_file: None,
            peers_file: None,
            verbosity: 3,
        }
    }
}

/// Parses the initialization file; a missing file yields the defaults.
pub fn parse_ini_file(ini_file: &Path) -> Result<ProgramOptions, String> {
    let mut options = ProgramOptions::default();
    if !ini_file.exists() {
        return Ok(options);
    }
    let ini = Ini::load_from_file(ini_file)
        .map_err(|error| format!("Failed to parse {}: {}", ini_file.display(), error))?;

    if let Some(address) = ini.get_from(Some("ZeroMQ"), "proxyFrontendAddress") {
        options.frontend_address = normalize_tcp_address("ZeroMQ.proxyFrontendAddress", address)?;
    }
    if let Some(address) = ini.get_from(Some("ZeroMQ"), "proxyBackendAddress") {
        options.backend_address = normalize_tcp_address("ZeroMQ.proxyBackendAddress", address)?;
    }
    if options.frontend_address == options.backend_address {
        return Err(format!(
            "Frontend address {} cannot be the same as the backend address",
            options.frontend_address
        ));
    }
    if let Some(hwm) = ini.get_from(Some("ZeroMQ"), "sendHighWaterMark") {
        options.send_high_water_mark = hwm
            .trim()
            .parse::<i32>()
            .map_err(|_| format!("ZeroMQ.sendHighWaterMark = {} is not an integer", hwm))?;
        if options.send_high_water_mark < 0 {
            return Err("ZeroMQ.sendHighWaterMark cannot be negative".to_string());
        }
    }
    if let Some(path) = ini.get_from(Some("ZeroMQ"), "serverKeyFile") {
        if !path.is_empty() {
            options.server_key_file = Some(PathBuf::from(path));
        }
    }
    if let Some(path) = ini.get_from(Some("ZeroMQ"), "peersFile") {
        if !path.is_empty() {
            options.peers_file = Some(PathBuf::from(path));
        }
    }
    if let Some(verbosity) = ini.get_from(Some("General"), "verbosity") {
        options.verbosity = verbosity
            .trim()
            .parse::<i32>()
            .map_err(|_| format!("General.verbosity = {} is not an integer", verbosity))?;
    }

    Ok(options)
}

/// A bare `host:port` is promoted to a `tcp://` endpoint.
fn normalize_tcp_address(key: &str, address: &str) -> Result<String, String> {
    if address.is_empty() {
        return Err(format!("{} is empty", key));
    }
    if address.starts_with("tcp://") {
        Ok(address.to_string())
    } else if address.contains("://") {
        Err(format!("{} must be a tcp:// endpoint", key))
    } else {
        Ok(format!("tcp://{}", address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "proxy_config_test_{}_{:?}.ini",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let options = parse_ini_file(Path::new("/nonexistent/proxy.ini")).unwrap();
        assert_eq!(options.frontend_address, "tcp://127.0.0.1:5550");
        assert_eq!(options.backend_address, "tcp://127.0.0.1:5551");
        assert!(options.server_key_file.is_none());
    }

    #[test]
    fn test_bare_addresses_are_promoted() {
        let path = write_ini(
            "[ZeroMQ]\nproxyFrontendAddress = 10.0.0.1:6000\nproxyBackendAddress = tcp://10.0.0.1:6001\n",
        );
        let options = parse_ini_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(options.frontend_address, "tcp://10.0.0.1:6000");
        assert_eq!(options.backend_address, "tcp://10.0.0.1:6001");
    }

    #[test]
    fn test_identical_addresses_rejected() {
        let path = write_ini(
            "[ZeroMQ]\nproxyFrontendAddress = tcp://10.0.0.1:6000\nproxyBackendAddress = tcp://10.0.0.1:6000\n",
        );
        let result = parse_ini_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
