//! Random secret generation from a character pool.

use rand::rngs::OsRng;
use rand::Rng;

use super::expression::{DEFAULT_SIZE, DEFAULT_SPECIAL};

pub const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
pub const DIGITS: &str = "0123456789";

/// Draws characters uniformly from a pool using the OS random source.
///
/// Required classes are checked after each draw; a value missing one of them
/// is thrown away and drawn again.
#[derive(Debug, Clone, Default)]
pub struct SecretGenerator {
    pool: Vec<char>,
    required: Vec<Vec<char>>,
}

impl SecretGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add characters to the pool. Duplicates are ignored so every distinct
    /// character has the same weight.
    pub fn add(&mut self, chars: &str) -> &mut Self {
        for c in chars.chars() {
            if !self.pool.contains(&c) {
                self.pool.push(c);
            }
        }
        self
    }

    /// Add a class to the pool and require at least one of its characters.
    pub fn add_required(&mut self, chars: &str) -> &mut Self {
        self.add(chars);
        let class: Vec<char> = chars.chars().collect();
        if !class.is_empty() {
            self.required.push(class);
        }
        self
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Generate `size` characters. An empty pool yields an empty string.
    pub fn generate(&self, size: usize) -> String {
        if self.pool.is_empty() || size == 0 {
            return String::new();
        }

        // A value shorter than the number of required classes can never pass.
        let enforce = self.required.len() <= size;
        loop {
            let candidate: Vec<char> = (0..size)
                .map(|_| self.pool[OsRng.gen_range(0..self.pool.len())])
                .collect();

            if !enforce || self.satisfies(&candidate) {
                return candidate.into_iter().collect();
            }
        }
    }

    fn satisfies(&self, candidate: &[char]) -> bool {
        self.required
            .iter()
            .all(|class| candidate.iter().any(|c| class.contains(c)))
    }
}

/// Length and character classes of a generated secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPolicy {
    pub size: usize,
    pub upper: bool,
    pub lower: bool,
    pub digits: bool,
    /// Special characters; empty disables the class.
    pub special: String,
    /// Explicit pool that replaces every class.
    pub chars: Option<String>,
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            upper: true,
            lower: true,
            digits: true,
            special: DEFAULT_SPECIAL.to_string(),
            chars: None,
        }
    }
}

impl SecretPolicy {
    /// Generate a secret. A size of zero means the default size.
    ///
    /// `chars` replaces the classes and disables validation. When any class
    /// is switched off, every class still on must appear at least once.
    pub fn generate(&self) -> String {
        let size = if self.size == 0 { DEFAULT_SIZE } else { self.size };
        let mut generator = SecretGenerator::new();

        if let Some(chars) = self.chars.as_deref().filter(|c| !c.trim().is_empty()) {
            generator.add(chars);
            return generator.generate(size);
        }

        let special_on = !self.special.trim().is_empty();
        let restricted = !self.upper || !self.lower || !self.digits || !special_on;
        let classes = [
            (self.upper, UPPER),
            (self.lower, LOWER),
            (self.digits, DIGITS),
            (special_on, self.special.as_str()),
        ];
        for (enabled, class) in classes {
            match (enabled, restricted) {
                (true, true) => {
                    generator.add_required(class);
                }
                (true, false) => {
                    generator.add(class);
                }
                _ => {}
            }
        }

        if generator.pool_len() == 0 {
            generator.add(UPPER).add(LOWER).add(DIGITS);
        }
        generator.generate(size)
    }
}
