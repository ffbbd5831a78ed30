//! Generates a Stonehouse keypair: `<name>.json` holds both halves for the
//! owning process, `<name>.pub.json` only the public half for its peers.

use std::fs;
use std::path::Path;
use std::process::exit;

use clap::{Arg, Command};
use rand::RngCore;
use strata::credential::{Key, KeyPair, KEY_SIZE};

fn main() {
    let matches = Command::new("gen_keys")
        .about("Generates a handshake keypair and writes it to disk.")
        .arg(
            Arg::new("OUT_DIR")
                .help("Directory to write the key files into")
                .required(true),
        )
        .arg(
            Arg::new("NAME")
                .help("Base name for the key files")
                .required(true),
        )
        .arg(
            Arg::new("metadata")
                .long("metadata")
                .value_name("TEXT")
                .help("Free-form note stored with the keys"),
        )
        .get_matches();

    let out_dir = Path::new(matches.get_one::<String>("OUT_DIR").unwrap());
    let name = matches.get_one::<String>("NAME").unwrap();
    if !out_dir.is_dir() {
        eprintln!("Output directory {} does not exist", out_dir.display());
        exit(1);
    }

    let mut rng = rand::thread_rng();
    let mut public_key = [0u8; KEY_SIZE];
    let mut secret_key = [0u8; KEY_SIZE];
    rng.fill_bytes(&mut public_key);
    rng.fill_bytes(&mut secret_key);

    let mut pair = KeyPair::new(Key::new(public_key), Key::new(secret_key));
    if let Some(metadata) = matches.get_one::<String>("metadata") {
        pair.set_metadata(metadata);
    }

    let pair_path = out_dir.join(format!("{}.json", name));
    let public_path = out_dir.join(format!("{}.pub.json", name));

    if let Err(error) = fs::write(
        &pair_path,
        serde_json::to_string_pretty(&pair).expect("Keypair must serialize"),
    ) {
        eprintln!("Failed to write {}: {}", pair_path.display(), error);
        exit(1);
    }
    if let Err(error) = fs::write(
        &public_path,
        serde_json::to_string_pretty(&pair.to_public()).expect("Key must serialize"),
    ) {
        eprintln!("Failed to write {}: {}", public_path.display(), error);
        exit(1);
    }

    println!("Wrote {}", pair_path.display());
    println!("Wrote {}", public_path.display());
}
