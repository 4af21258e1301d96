//! The catalog sold by the joke server.

use rand::Rng;

pub const JOKES: &[&str] = &[
    "I told my wallet a joke about inflation. It didn't find it worth the money.",
    "Why did the micropayment break up with the credit card? It wanted something less committal.",
    "My budget and I have a lot in common. We both fall apart at the end of the month.",
    "Why don't programmers like nature? It has too many bugs and no stack traces.",
    "A penny for your thoughts? At these prices, I'd settle for one cent per joke.",
    "Why did the invoice go to therapy? It felt used after just one payment.",
    "There are 10 kinds of people: those who understand binary and those who pay full price.",
    "I asked the blockchain for a joke. It's still waiting for confirmations.",
];

/// Pick a joke uniformly at random.
pub fn random_joke() -> &'static str {
    JOKES[rand::rng().random_range(0..JOKES.len())]
}
