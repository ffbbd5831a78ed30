//! Sanitizer program options: compiled-in defaults overridden by the INI
//! sections the executable recognizes.

use std::path::Path;

use ini::Ini;

#[derive(Debug, Clone)]
pub struct ProgramOptions {
    pub input_broadcast_address: String,
    pub output_broadcast_address: String,
    pub receive_time_out_millis: i64,
    pub send_time_out_millis: i64,
    pub maximum_future_time_millis: i64,
    pub maximum_latency_secs: i64,
    pub circular_buffer_duration_secs: i64,
    pub log_bad_data_interval_secs: i64,
    pub log_publishing_performance_interval_secs: i64,
    pub receive_high_water_mark: i32,
    pub send_high_water_mark: i32,
    pub verbosity: i32,
}

impl Default for ProgramOptions {
    fn default() -> ProgramOptions {
        ProgramOptions {
            input_broadcast_address: "tcp://127.0.0.1:5551".to_string(),
            output_broadcast_address: "tcp://127.0.0.1:5552".to_string(),
            receive_time_out_millis: 10,
            send_time_out_millis: 1000,
            maximum_future_time_millis: 0,
            maximum_latency_secs: 120,
            circular_buffer_duration_secs: 120,
            log_bad_data_interval_secs: 60,
            log_publishing_performance_interval_secs: 3600,
            receive_high_water_mark: 4096,
            send_high_water_mark: 4096,
            verbosity: 3,
        }
    }
}

pub fn get_string(ini: &Ini, section: &str, key: &str, default: &str) -> String {
    ini.get_from(Some(section), key)
        .map(|value| value.to_string())
        .unwrap_or_else(|| default.to_string())
}

pub fn get_i64(ini: &Ini, section: &str, key: &str, default: i64) -> Result<i64, String> {
    match ini.get_from(Some(section), key) {
        Some(value) => value
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{}.{} = {} is not an integer", section, key, value)),
        None => Ok(default),
    }
}

pub fn get_i32(ini: &Ini, section: &str, key: &str, default: i32) -> Result<i32, String> {
    get_i64(ini, section, key, default as i64).map(|value| value as i32)
}

/// Parses the initialization file; keys that are absent keep their
/// defaults, and a missing file yields the defaults outright.
pub fn parse_ini_file(ini_file: &Path) -> Result<ProgramOptions, String> {
    let mut options = ProgramOptions::default();
    if !ini_file.exists() {
        return Ok(options);
    }
    let ini = Ini::load_from_file(ini_file)
        .map_err(|error| format!("Failed to parse {}: {}", ini_file.display(), error))?;

    options.input_broadcast_address = get_string(
        &ini,
        "ZeroMQ",
        "inputBroadcastAddress",
        &options.input_broadcast_address,
    );
    validate_tcp_address("ZeroMQ.inputBroadcastAddress", &options.input_broadcast_address)?;

    options.output_broadcast_address = get_string(
        &ini,
        "ZeroMQ",
        "outputBroadcastAddress",
        &options.output_broadcast_address,
    );
    validate_tcp_address(
        "ZeroMQ.outputBroadcastAddress",
        &options.output_broadcast_address,
    )?;

    options.send_high_water_mark = get_i32(
        &ini,
        "ZeroMQ",
        "sendHighWaterMark",
        options.send_high_water_mark,
    )?;
    options.send_time_out_millis = get_i64(
        &ini,
        "ZeroMQ",
        "sendTimeOutInMilliSeconds",
        options.send_time_out_millis,
    )?;

    options.maximum_future_time_millis = get_i64(
        &ini,
        "Sanitizer",
        "maximumFutureTimeInMilliSeconds",
        options.maximum_future_time_millis,
    )?;
    options.maximum_latency_secs = get_i64(
        &ini,
        "Sanitizer",
        "maximumLatencyInSeconds",
        options.maximum_latency_secs,
    )?;
    options.circular_buffer_duration_secs = get_i64(
        &ini,
        "Sanitizer",
        "circularBufferDurationInSeconds",
        options.circular_buffer_duration_secs,
    )?;
    options.log_bad_data_interval_secs = get_i64(
        &ini,
        "Sanitizer",
        "logBadDataIntervalInSeconds",
        options.log_bad_data_interval_secs,
    )?;

    options.log_publishing_performance_interval_secs = get_i64(
        &ini,
        "General",
        "logPublishingPerformanceIntervalInSeconds",
        options.log_publishing_performance_interval_secs,
    )?;
    options.verbosity = get_i32(&ini, "General", "verbosity", options.verbosity)?;

    Ok(options)
}

fn validate_tcp_address(key: &str, address: &str) -> Result<(), String> {
    if address.is_empty() {
        return Err(format!("{} is empty", key));
    }
    if !address.starts_with("tcp://") {
        return Err(format!("{} must start with tcp://", key));
    }
    Ok(())
}
