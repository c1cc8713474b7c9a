use alloc::string::String;
use alloc::vec::Vec;

use crate::raw::RawTable;

/// Live entries per probe distance from their home slot.
///
/// Index `d` holds the number of entries sitting `d` slots past their home
/// slot; index 0 counts entries found on the first probe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeHistogram {
    counts: Vec<usize>,
}

impl ProbeHistogram {
    pub(crate) fn of(raw: &RawTable) -> Self {
        Self {
            counts: raw.probe_lengths(),
        }
    }

    /// Entry counts indexed by probe distance.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Number of entries counted.
    pub fn entries(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Longest probe distance of any entry, or `None` for an empty table.
    pub fn max_probe_length(&self) -> Option<usize> {
        self.counts.iter().rposition(|&count| count > 0)
    }

    /// Average probe distance over all entries.
    pub fn mean_probe_length(&self) -> f64 {
        let entries = self.entries();
        if entries == 0 {
            return 0.0;
        }
        let total: usize = self
            .counts
            .iter()
            .enumerate()
            .map(|(distance, &count)| distance * count)
            .sum();
        total as f64 / entries as f64
    }

    /// Renders the histogram as horizontal bars, one row per distance.
    pub fn render(&self) -> String {
        use core::fmt::Write;

        let max = self.counts.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return String::from("probe histogram: empty\n");
        }

        const MAX_BAR: usize = 60;
        const EIGHTHS: [char; 7] = ['▏', '▎', '▍', '▌', '▋', '▊', '▉'];

        let mut out = String::new();
        let _ = writeln!(out, "probe histogram ({} entries):", self.entries());
        for (distance, &count) in self.counts.iter().enumerate() {
            let units = (count * MAX_BAR * 8).div_ceil(max);
            let mut bar = "█".repeat(units / 8);
            if units % 8 > 0 {
                bar.push(EIGHTHS[units % 8 - 1]);
            }
            let _ = writeln!(out, "{distance:>3} | {bar} ({count})");
        }
        out
    }

    /// Prints [`render`](Self::render) to stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        print!("{}", self.render());
    }
}

/// Occupancy and memory statistics for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugStats {
    /// Number of live entries
    pub len: usize,
    /// Number of tombstoned slots
    pub tombstones: usize,
    /// Number of slots
    pub capacity: usize,
    /// `capacity == 2^power`
    pub power: u32,
    /// `len / capacity`
    pub load_factor: f64,
    /// Longest probe distance of any live entry
    pub max_probe_length: usize,
    /// Average probe distance over live entries
    pub mean_probe_length: f64,
    /// Bytes held by the storage allocation
    pub total_bytes: usize,
    /// Bytes of slot records not holding a live entry
    pub wasted_bytes: usize,
}

impl DebugStats {
    pub(crate) fn of(raw: &RawTable) -> Self {
        let histogram = ProbeHistogram::of(raw);
        Self {
            len: raw.len(),
            tombstones: raw.tombstones(),
            capacity: raw.capacity(),
            power: raw.power(),
            load_factor: raw.len() as f64 / raw.capacity() as f64,
            max_probe_length: histogram.max_probe_length().unwrap_or(0),
            mean_probe_length: histogram.mean_probe_length(),
            total_bytes: raw.allocated_bytes(),
            wasted_bytes: raw.unused_entry_bytes(),
        }
    }

    /// Pretty-prints the statistics to stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== vmap statistics ===");
        println!(
            "Entries: {}/{} slots, power {} ({:.2}% load factor)",
            self.len,
            self.capacity,
            self.power,
            self.load_factor * 100.0
        );
        println!("Tombstones: {}", self.tombstones);
        println!(
            "Probe length: max {}, mean {:.3}",
            self.max_probe_length, self.mean_probe_length
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes wasted ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}
