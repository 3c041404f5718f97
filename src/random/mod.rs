use tracing::trace;

use crate::{Automaton, StateId};

/// Returns the first `symbols` lowercase letters, starting at `'a'`.
pub fn alphabet_of_size(symbols: usize) -> Vec<char> {
    ('a'..='z').take(symbols).collect()
}

/// Generate a random automaton with `size` states by randomly drawing transitions and
/// acceptance flags. `symbols` determines the number of distinct symbols.
/// The algorithm is as follows:
/// 1. Start with `size` states, each of which is accepting with probability 1/2.
/// 2. For each state and each symbol, draw a target. With probability 1/8 no transition is
///    inserted at all, so the result is not necessarily total.
///
/// Note that there may be states which are unreachable from the initial state `0`.
pub fn generate_random_automaton(symbols: usize, size: usize) -> Automaton {
    let alphabet = alphabet_of_size(symbols);
    let mut aut = Automaton::new(alphabet.iter().copied());
    for _ in 0..size {
        aut.add_state(fastrand::bool(), ());
    }
    for q in 0..size as StateId {
        for sym in &alphabet {
            if fastrand::u8(..8) == 0 {
                continue;
            }
            let target = fastrand::u32(..size as StateId);
            // q was added above, so the source exists
            let _ = aut.add_transition(q, *sym, target);
        }
    }
    trace!("generated random automaton with {size} states over {symbols} symbols");
    aut
}

/// Draws `count` random words over `alphabet` whose length is at most `max_len`.
pub fn generate_random_words(alphabet: &[char], max_len: usize, count: usize) -> Vec<Vec<char>> {
    (0..count)
        .map(|_| {
            let len = fastrand::usize(..=max_len);
            (0..len)
                .filter_map(|_| fastrand::choice(alphabet).copied())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{alphabet_of_size, generate_random_automaton, generate_random_words};

    #[test]
    fn random_automaton_sized() {
        let aut = generate_random_automaton(3, 10);
        assert_eq!(aut.size(), 10);
        assert_eq!(aut.alphabet().len(), 3);
        assert!(aut.validate().is_ok());
    }

    #[test]
    fn random_words() {
        let alphabet = alphabet_of_size(2);
        let words = generate_random_words(&alphabet, 5, 20);
        assert_eq!(words.len(), 20);
        assert!(words
            .iter()
            .all(|w| w.len() <= 5 && w.iter().all(|c| alphabet.contains(c))));
    }
}
