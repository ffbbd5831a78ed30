//! SEEDLink stream selection: which stations to request and which
//! location/channel/type patterns to ask for on each.

use std::fmt;

/// The record type suffix of a selector pattern.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SelectorType {
    All,
    Data,
    Timing,
    Log,
    Event,
    Blockette,
    Calibration,
}

impl SelectorType {
    pub fn from_letter(letter: char) -> Result<SelectorType, String> {
        Ok(match letter.to_ascii_uppercase() {
            'A' => SelectorType::All,
            'D' => SelectorType::Data,
            'T' => SelectorType::Timing,
            'L' => SelectorType::Log,
            'E' => SelectorType::Event,
            'B' => SelectorType::Blockette,
            'C' => SelectorType::Calibration,
            other => return Err(format!("Unhandled selector type {}", other)),
        })
    }

    fn suffix(&self) -> Option<char> {
        match self {
            SelectorType::All => None,
            SelectorType::Data => Some('D'),
            SelectorType::Timing => Some('T'),
            SelectorType::Log => Some('L'),
            SelectorType::Event => Some('E'),
            SelectorType::Blockette => Some('B'),
            SelectorType::Calibration => Some('C'),
        }
    }
}

/// A network/station filter with an optional location/channel pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSelector {
    network: String,
    station: String,
    channel: String,
    location_code: String,
    selector_type: SelectorType,
}

impl Default for StreamSelector {
    fn default() -> StreamSelector {
        StreamSelector::new()
    }
}

impl StreamSelector {
    pub fn new() -> StreamSelector {
        StreamSelector {
            network: String::new(),
            station: "*".to_string(),
            channel: String::new(),
            location_code: String::new(),
            selector_type: SelectorType::All,
        }
    }

    pub fn set_network(&mut self, network: &str) -> Result<(), String> {
        if network.len() != 2 {
            return Err("Network size must be 2".to_string());
        }
        self.network = network.to_ascii_uppercase();
        Ok(())
    }

    #[inline]
    pub fn network(&self) -> &str {
        &self.network
    }

    #[inline]
    pub fn have_network(&self) -> bool {
        !self.network.is_empty()
    }

    pub fn set_station(&mut self, station: &str) -> Result<(), String> {
        if station.is_empty() {
            return Err("Station is empty".to_string());
        }
        self.station = station.to_ascii_uppercase();
        Ok(())
    }

    #[inline]
    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn set_selector(
        &mut self,
        channel: &str,
        location_code: &str,
        selector_type: SelectorType,
    ) {
        self.channel = channel.to_ascii_uppercase();
        self.location_code = location_code.to_ascii_uppercase();
        self.selector_type = selector_type;
    }

    /// The `NET_STA` identifier sent with the STATION command.
    pub fn station_id(&self) -> String {
        format!("{}_{}", self.network, self.station)
    }

    /// Builds the `LLCCC.T` pattern for the SELECT command; empty means
    /// everything.
    pub fn selector(&self) -> String {
        let location_channel = if self.location_code.is_empty() && self.channel.is_empty() {
            String::new()
        } else {
            let location = if self.location_code.is_empty() {
                "??".to_string()
            } else {
                self.location_code.clone()
            };
            let channel = if self.channel.is_empty() {
                "*".to_string()
            } else {
                self.channel.clone()
            };
            format!("{}{}", location, channel)
        };

        match self.selector_type.suffix() {
            None => {
                if location_channel.is_empty() {
                    String::new()
                } else {
                    format!("{}.*", location_channel)
                }
            }
            Some(suffix) => {
                if location_channel.is_empty() {
                    format!("*.{}", suffix)
                } else {
                    format!("{}.{}", location_channel, suffix)
                }
            }
        }
    }
}

impl fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.station_id(), self.selector())
    }
}
