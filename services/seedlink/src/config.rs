//! SEEDLink publisher program options.

use std::path::Path;

use ini::Ini;

use crate::client::ClientOptions;
use crate::selector::{SelectorType, StreamSelector};

pub const MAX_DATA_SELECTORS: u32 = 32768;

#[derive(Clone)]
pub struct ProgramOptions {
    pub proxy_frontend_address: String,
    pub send_high_water_mark: i32,
    pub send_time_out_millis: i64,
    pub log_publishing_performance_interval_secs: i64,
    pub verbosity: i32,
    pub client: ClientOptions,
}

impl Default for ProgramOptions {
    fn default() -> ProgramOptions {
        ProgramOptions {
            proxy_frontend_address: "tcp://127.0.0.1:5550".to_string(),
            send_high_water_mark: 1024,
            send_time_out_millis: 1000,
            log_publishing_performance_interval_secs: 3600,
            verbosity: 3,
            client: ClientOptions::default(),
        }
    }
}

/// Parses one `data_selector_<N>` value: a pipe- or comma-separated token
/// list `NET [STA [CHAN [LOC [TYPE]]]]`.
pub fn parse_selector(value: &str) -> Result<StreamSelector, String> {
    let tokens: Vec<&str> = value
        .split(['|', ','])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(format!("Empty selector: {}", value));
    }
    if tokens.len() > 5 {
        return Err(format!("Too many selector tokens: {}", value));
    }

    let mut selector = StreamSelector::new();
    selector.set_network(tokens[0])?;
    if let Some(station) = tokens.get(1) {
        selector.set_station(station)?;
    }
    let channel = tokens.get(2).copied().unwrap_or("");
    let location = tokens.get(3).copied().unwrap_or("");
    let selector_type = match tokens.get(4) {
        Some(token) => {
            let letter = token
                .chars()
                .next()
                .ok_or_else(|| format!("Empty selector type in {}", value))?;
            SelectorType::from_letter(letter)?
        }
        None => SelectorType::All,
    };
    selector.set_selector(channel, location, selector_type);
    Ok(selector)
}

/// Parses the initialization file; a missing file yields the defaults.
pub fn parse_ini_file(ini_file: &Path) -> Result<ProgramOptions, String> {
    let mut options = ProgramOptions::default();
    if !ini_file.exists() {
        return Ok(options);
    }
    let ini = Ini::load_from_file(ini_file)
        .map_err(|error| format!("Failed to parse {}: {}", ini_file.display(), error))?;

    if let Some(address) = ini.get_from(Some("SEEDLink"), "address") {
        options.client.set_address(address)?;
    }
    if let Some(port) = ini.get_from(Some("SEEDLink"), "port") {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| format!("SEEDLink.port = {} is not a port", port))?;
        options.client.set_port(port);
    }
    if let Some(state_file) = ini.get_from(Some("SEEDLink"), "stateFile") {
        options.client.set_state_file(state_file)?;
    }
    if let Some(record_size) = ini.get_from(Some("SEEDLink"), "recordSize") {
        let record_size = record_size
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("SEEDLink.recordSize = {} is not an integer", record_size))?;
        options.client.set_record_size(record_size)?;
    }

    if let Some(section) = ini.section(Some("SEEDLink")) {
        // Selector keys are numbered; honor the numbering, not the file
        // order.
        let mut selectors: Vec<(u32, &str)> = Vec::new();
        for (key, value) in section.iter() {
            if let Some(suffix) = key.strip_prefix("data_selector_") {
                let index = suffix
                    .parse::<u32>()
                    .map_err(|_| format!("Bad selector key {}", key))?;
                if index == 0 || index > MAX_DATA_SELECTORS {
                    return Err(format!("Selector index {} out of range", index));
                }
                selectors.push((index, value));
            }
        }
        selectors.sort_by_key(|&(index, _)| index);
        for (_, value) in selectors {
            let selector = parse_selector(value)?;
            options.client.add_stream_selector(selector)?;
        }
    }

    if let Some(address) = ini.get_from(Some("ZeroMQ"), "proxyFrontendAddress") {
        if address.is_empty() {
            return Err("ZeroMQ.proxyFrontendAddress is empty".to_string());
        }
        if !address.starts_with("tcp://") {
            return Err("ZeroMQ.proxyFrontendAddress must start with tcp://".to_string());
        }
        options.proxy_frontend_address = address.to_string();
    }
    if let Some(hwm) = ini.get_from(Some("ZeroMQ"), "sendHighWaterMark") {
        options.send_high_water_mark = hwm
            .trim()
            .parse::<i32>()
            .map_err(|_| format!("ZeroMQ.sendHighWaterMark = {} is not an integer", hwm))?;
    }
    if let Some(time_out) = ini.get_from(Some("ZeroMQ"), "sendTimeOutInMilliSeconds") {
        options.send_time_out_millis = time_out.trim().parse::<i64>().map_err(|_| {
            format!(
                "ZeroMQ.sendTimeOutInMilliSeconds = {} is not an integer",
                time_out
            )
        })?;
    }

    if let Some(interval) = ini.get_from(Some("General"), "logPublishingPerformanceIntervalInSeconds")
    {
        options.log_publishing_performance_interval_secs =
            interval.trim().parse::<i64>().map_err(|_| {
                format!(
                    "General.logPublishingPerformanceIntervalInSeconds = {} is not an integer",
                    interval
                )
            })?;
    }
    if let Some(verbosity) = ini.get_from(Some("General"), "verbosity") {
        options.verbosity = verbosity
            .trim()
            .parse::<i32>()
            .map_err(|_| format!("General.verbosity = {} is not an integer", verbosity))?;
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "seedlink_config_test_{}_{:?}.ini",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_selector_tokens() {
        let selector = parse_selector("UU").unwrap();
        assert_eq!(selector.network(), "UU");
        assert_eq!(selector.station(), "*");
        assert_eq!(selector.selector(), "");

        let selector = parse_selector("UU|FORK|HH?|01|D").unwrap();
        assert_eq!(selector.station_id(), "UU_FORK");
        assert_eq!(selector.selector(), "01HH?.D");

        let selector = parse_selector("UU, FORK, EHZ").unwrap();
        assert_eq!(selector.selector(), "??EHZ.*");

        assert!(parse_selector("").is_err());
        assert!(parse_selector("TOOLONG").is_err());
        assert!(parse_selector("UU|FORK|HHZ|01|D|extra").is_err());
    }

    #[test]
    fn test_parse_ini() {
        let path = write_ini(
            r#"
[SEEDLink]
address = rtserve.iris.washington.edu
port = 18000
recordSize = 512
data_selector_2 = UU|CWU|EHZ|01|D
data_selector_1 = UU|FORK|HH?||D

[ZeroMQ]
proxyFrontendAddress = tcp://127.0.0.1:5550
sendHighWaterMark = 2048
sendTimeOutInMilliSeconds = 500

[General]
logPublishingPerformanceIntervalInSeconds = 600
"#,
        );
        let options = parse_ini_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(options.proxy_frontend_address, "tcp://127.0.0.1:5550");
        assert_eq!(options.send_high_water_mark, 2048);
        assert_eq!(options.send_time_out_millis, 500);
        assert_eq!(options.log_publishing_performance_interval_secs, 600);

        let selectors = options.client.stream_selectors();
        assert_eq!(selectors.len(), 2);
        // Numbered order, not file order.
        assert_eq!(selectors[0].station_id(), "UU_FORK");
        assert_eq!(selectors[1].station_id(), "UU_CWU");
    }

    #[test]
    fn test_selector_index_bounds() {
        let path = write_ini("[SEEDLink]\ndata_selector_0 = UU\n");
        let result = parse_ini_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let options = parse_ini_file(Path::new("/nonexistent/seedlink.ini")).unwrap();
        assert_eq!(options.client.address(), "rtserve.iris.washington.edu");
        assert_eq!(options.client.port(), 18000);
    }
}
