/// Power of two of the slot count a table is created with.
pub const INITIAL_POWER: u32 = 5;

/// Ratio of live-or-tombstoned slots above which a table grows.
pub const MAX_LOAD: f64 = 0.7;

/// Ratio of live slots below which a table shrinks.
pub const MIN_LOAD: f64 = 0.3;

/// Load-factor and initial-capacity settings for a table.
///
/// # Examples
///
/// ```rust
/// use vmap::Config;
///
/// let config = Config::new()
///     .with_initial_power(8)
///     .with_load_factors(0.2, 0.8);
/// assert_eq!(config.initial_capacity(), 256);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    initial_power: u32,
    max_load: f64,
    min_load: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// The default policy: 32 initial slots, grow above 0.7, shrink below 0.3.
    pub const fn new() -> Self {
        Self {
            initial_power: INITIAL_POWER,
            max_load: MAX_LOAD,
            min_load: MIN_LOAD,
        }
    }

    /// Sets the initial slot count to `2^power`. A table never shrinks below
    /// this, or below the capacity it was created or reserved with.
    ///
    /// # Panics
    ///
    /// Panics if `power` is zero or would not leave room to grow.
    pub const fn with_initial_power(mut self, power: u32) -> Self {
        assert!(
            power >= 1 && power < usize::BITS - 1,
            "initial power must be in 1..usize::BITS - 1"
        );
        self.initial_power = power;
        self
    }

    /// Sets the shrink and grow thresholds.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < max_load < 1` and `0 <= 2 * min_load < max_load`.
    /// The second bound keeps a freshly shrunk table below the grow
    /// threshold.
    pub fn with_load_factors(mut self, min_load: f64, max_load: f64) -> Self {
        assert!(
            max_load > 0.0 && max_load < 1.0,
            "max load must be in (0, 1)"
        );
        assert!(
            min_load >= 0.0 && min_load * 2.0 < max_load,
            "min load must be in [0, max_load / 2)"
        );
        self.min_load = min_load;
        self.max_load = max_load;
        self
    }

    /// Power of two the table starts at and never shrinks below.
    pub fn initial_power(&self) -> u32 {
        self.initial_power
    }

    /// Slot count the table starts with.
    pub fn initial_capacity(&self) -> usize {
        1 << self.initial_power
    }

    /// Grow threshold.
    pub fn max_load(&self) -> f64 {
        self.max_load
    }

    /// Shrink threshold.
    pub fn min_load(&self) -> f64 {
        self.min_load
    }

    #[inline]
    pub(crate) fn exceeds_max_load(&self, occupied_or_tombstoned: usize, capacity: usize) -> bool {
        occupied_or_tombstoned as f64 > self.max_load * capacity as f64
    }

    #[inline]
    pub(crate) fn below_min_load(&self, occupied: usize, capacity: usize) -> bool {
        (occupied as f64) < self.min_load * capacity as f64
    }

    /// Smallest power, no lower than the initial one, whose capacity holds
    /// `count` entries without crossing the grow threshold.
    pub(crate) fn power_for(&self, count: usize) -> Option<u32> {
        (self.initial_power..usize::BITS - 1)
            .find(|&power| !self.exceeds_max_load(count, 1 << power))
    }
}
