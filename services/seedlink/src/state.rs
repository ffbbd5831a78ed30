//! Sequence-number persistence so a restarted client resumes where it
//! stopped. One line per station: `NET STA sequence`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;

#[derive(Debug, Default)]
pub struct StateFile {
    path: Option<PathBuf>,
    sequences: HashMap<(String, String), u64>,
}

impl StateFile {
    pub fn new(path: Option<&Path>) -> StateFile {
        StateFile {
            path: path.map(Path::to_path_buf),
            sequences: HashMap::new(),
        }
    }

    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Reads previously persisted sequence numbers. Missing files are not
    /// an error; unreadable lines are skipped.
    pub fn recover(&mut self) -> io::Result<usize> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(0),
        };
        if !path.exists() {
            return Ok(0);
        }

        let contents = fs::read_to_string(path)?;
        let mut recovered = 0;
        for line in contents.lines() {
            let mut tokens = line.split_whitespace();
            let network = tokens.next();
            let station = tokens.next();
            let sequence = tokens.next().and_then(|token| token.parse::<u64>().ok());
            if let (Some(network), Some(station), Some(sequence)) = (network, station, sequence) {
                self.sequences
                    .insert((network.to_string(), station.to_string()), sequence);
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    pub fn sequence(&self, network: &str, station: &str) -> Option<u64> {
        self.sequences
            .get(&(network.to_string(), station.to_string()))
            .copied()
    }

    pub fn update(&mut self, network: &str, station: &str, sequence: u64) {
        self.sequences
            .insert((network.to_string(), station.to_string()), sequence);
    }

    /// Rewrites the file with the current sequence map.
    pub fn save(&self) -> io::Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let mut contents = String::new();
        let mut entries: Vec<_> = self.sequences.iter().collect();
        entries.sort();
        for ((network, station), sequence) in entries {
            contents.push_str(&format!("{} {} {}\n", network, station, sequence));
        }
        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())
    }
}
