//! Identifier generation
//!
//! Circuits and links get short random alphanumeric tokens. Tokens always
//! start with a letter so they survive contexts that reject leading digits.

use rand::Rng;
use rand::distr::Alphanumeric;

const ID_LENGTH: usize = 10;
const ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generator for alphanumeric entity ids
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Produce the next random id.
    pub fn next_id(&self) -> String {
        let mut rng = rand::rng();
        let first = ALPHA[rng.random_range(0..ALPHA.len())] as char;
        let rest: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(ID_LENGTH - 1)
            .map(char::from)
            .collect();
        let mut id = String::with_capacity(ID_LENGTH);
        id.push(first);
        id.push_str(&rest);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_with_a_letter() {
        let generator = IdGenerator::new();
        for _ in 0..100 {
            let id = generator.next_id();
            assert_eq!(id.len(), ID_LENGTH);
            assert!(id.chars().next().unwrap().is_ascii_alphabetic());
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn ids_are_distinct() {
        let generator = IdGenerator::new();
        let a = generator.next_id();
        let b = generator.next_id();
        assert_ne!(a, b);
    }
}
