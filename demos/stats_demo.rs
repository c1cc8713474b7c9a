use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use clap::Parser;
use rand::Rng;
use rand::SeedableRng;
use rand::distr::Alphanumeric;
use rand::rngs::SmallRng;
use vmap::ErasedMap;
use vmap::OutOfMemory;
use vmap::TypeDescriptor;

/// Loads `key value` records into an `ErasedMap` and prints its statistics.
#[derive(Parser, Debug)]
struct Args {
    /// File of newline-separated `key value` records, or `-` for stdin.
    /// Without it, random keys are generated.
    input: Option<PathBuf>,

    /// Key width in bytes; longer keys are truncated, shorter ones zero-padded.
    #[arg(short = 'k', long = "key-size", default_value_t = 4)]
    key_size: usize,

    /// Number of random keys to generate when no input is given.
    #[arg(short = 'n', long = "count", default_value_t = 10_000)]
    count: usize,

    /// After loading, erase every Nth record and print the statistics again.
    #[arg(short = 'e', long = "erase-every")]
    erase_every: Option<usize>,
}

fn djb2(key: &[u8]) -> u64 {
    key.iter()
        .fold(5381u64, |h, &b| h.wrapping_mul(33).wrapping_add(b as u64))
}

fn read_input(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if path.as_os_str() == "-" {
        std::io::stdin().read_to_end(&mut buf)?;
    } else {
        File::open(path)?.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

/// Parses records up to the first blank line.
fn parse_records(input: &[u8], key_size: usize) -> (Vec<(Vec<u8>, i32)>, usize) {
    let mut records = Vec::new();
    let mut lines = input.split(|&b| b == b'\n').peekable();

    while let Some(line) = lines.next_if(|line| !line.is_empty()) {
        let split = line.iter().position(|&b| b == b' ').unwrap_or(line.len());
        let (raw_key, rest) = line.split_at(split);

        let mut key = raw_key[..raw_key.len().min(key_size)].to_vec();
        key.resize(key_size, 0);

        let value = rest
            .iter()
            .filter(|b| b.is_ascii_digit())
            .fold(0i32, |v, &b| v.wrapping_mul(10).wrapping_add((b - b'0') as i32));

        records.push((key, value));
    }

    // Skip the blank separator; anything after it is not loaded.
    lines.next();
    let ignored = lines.filter(|line| !line.is_empty()).count();
    (records, ignored)
}

fn random_records(count: usize, key_size: usize) -> Vec<(Vec<u8>, i32)> {
    let mut rng = SmallRng::from_os_rng();
    (0..count)
        .map(|i| {
            let key = (0..key_size).map(|_| rng.sample(Alphanumeric)).collect();
            (key, i as i32)
        })
        .collect()
}

fn main() {
    let args = Args::parse();

    let records = match &args.input {
        Some(path) => {
            let input = match read_input(path) {
                Ok(input) => input,
                Err(err) => {
                    eprintln!("failed to read {}: {err}", path.display());
                    std::process::exit(1);
                }
            };
            let (records, ignored) = parse_records(&input, args.key_size);
            if ignored > 0 {
                println!("Ignoring {ignored} records after the first blank line");
            }
            records
        }
        None => random_records(args.count, args.key_size),
    };

    let descriptor = TypeDescriptor::new(args.key_size, size_of::<i32>()).with_hash(djb2);
    let mut map = match ErasedMap::new(&descriptor) {
        Ok(map) => map,
        Err(err) => {
            eprintln!("cannot create map: {err}");
            std::process::exit(1);
        }
    };

    println!(
        "Loading {} records with {}-byte keys",
        records.len(),
        args.key_size
    );

    let mut table_full = 0;
    for (key, value) in &records {
        match map.insert(key, &value.to_ne_bytes()) {
            Ok(()) => {}
            Err(OutOfMemory::TableFull) => table_full += 1,
            Err(err) => {
                eprintln!("insert failed: {err}");
                std::process::exit(1);
            }
        }
    }

    println!(
        "Loaded {} distinct keys ({} duplicates, {} refused)",
        map.len(),
        records.len() - map.len() - table_full,
        table_full
    );
    map.probe_histogram().print();
    map.debug_stats().print();

    if let Some(every) = args.erase_every.filter(|&n| n > 0) {
        let erased = records
            .iter()
            .step_by(every)
            .filter(|(key, _)| map.erase(key).is_ok())
            .count();

        println!();
        println!("Erased {erased} keys");
        map.probe_histogram().print();
        map.debug_stats().print();
    }
}
