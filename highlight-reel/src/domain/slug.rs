//! Human-readable public handles for jobs.

use rand::RngExt;
use rand::seq::IndexedRandom;

const ADJECTIVES: &[&str] = &[
    "agile", "bold", "brisk", "clutch", "crisp", "daring", "deft", "electric", "fearless",
    "fierce", "golden", "hustling", "iconic", "lively", "mighty", "nimble", "quick", "rapid",
    "relentless", "smooth", "soaring", "steady", "swift", "vivid",
];

const NOUNS: &[&str] = &[
    "alley-oop", "assist", "block", "buzzer", "crossover", "dagger", "dime", "dunk", "fastbreak",
    "floater", "hook", "jumper", "layup", "putback", "rebound", "rim", "steal", "swish",
    "three", "tip-in", "triple", "windmill",
];

/// Source of candidate slugs. Uniqueness is checked by the caller.
pub trait SlugGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `adjective-noun-NNNN` slugs drawn from built-in word lists.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordSlugGenerator;

impl SlugGenerator for WordSlugGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quick");
        let noun = NOUNS.choose(&mut rng).copied().unwrap_or("dunk");
        let number: u16 = rng.random_range(0..10_000);
        format!("{adjective}-{noun}-{number:04}")
    }
}
