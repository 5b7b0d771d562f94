//! Glob containment by product-automaton emptiness.
//!
//! A glob compiles to a linear NFA over positions in its token list;
//! containment of `q` in `p` holds iff `L(q) ∖ L(p)` is empty. The check
//! walks the product of the two subset-construction DFAs over a reduced
//! alphabet: every character mentioned literally by either pattern, plus
//! one symbol standing for all remaining characters (both automata treat
//! all unmentioned characters identically).

use std::collections::{BTreeSet, HashSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tok {
    Char(char),
    /// `?` — exactly one character.
    Any,
    /// `*` — any sequence, including empty.
    Star,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Sym {
    Char(char),
    /// Any character neither pattern mentions literally.
    Other,
}

fn tokenize(glob: &str) -> Vec<Tok> {
    glob.chars()
        .map(|ch| match ch {
            '*' => Tok::Star,
            '?' => Tok::Any,
            other => Tok::Char(other),
        })
        .collect()
}

/// Epsilon closure: a `*` at position i may be skipped, reaching i + 1.
fn closure(tokens: &[Tok], mut states: BTreeSet<usize>) -> BTreeSet<usize> {
    let mut frontier: Vec<usize> = states.iter().copied().collect();
    while let Some(i) = frontier.pop() {
        if matches!(tokens.get(i), Some(Tok::Star)) && states.insert(i + 1) {
            frontier.push(i + 1);
        }
    }
    states
}

fn step(tokens: &[Tok], states: &BTreeSet<usize>, sym: Sym) -> BTreeSet<usize> {
    let mut next = BTreeSet::new();
    for &i in states {
        match tokens.get(i) {
            Some(Tok::Char(c)) => {
                if sym == Sym::Char(*c) {
                    next.insert(i + 1);
                }
            }
            Some(Tok::Any) => {
                next.insert(i + 1);
            }
            Some(Tok::Star) => {
                // The star consumes the symbol and keeps looping.
                next.insert(i);
            }
            None => {}
        }
    }
    closure(tokens, next)
}

fn accepting(tokens: &[Tok], states: &BTreeSet<usize>) -> bool {
    states.contains(&tokens.len())
}

/// True iff every string matching glob `q` also matches glob `p`.
pub(crate) fn glob_contains(p: &str, q: &str) -> bool {
    let p_tokens = tokenize(p);
    let q_tokens = tokenize(q);

    let mut alphabet: BTreeSet<Sym> = p_tokens
        .iter()
        .chain(q_tokens.iter())
        .filter_map(|t| match t {
            Tok::Char(c) => Some(Sym::Char(*c)),
            _ => None,
        })
        .collect();
    alphabet.insert(Sym::Other);

    let start = (
        closure(&q_tokens, BTreeSet::from([0])),
        closure(&p_tokens, BTreeSet::from([0])),
    );

    let mut seen: HashSet<(Vec<usize>, Vec<usize>)> = HashSet::new();
    let mut queue = VecDeque::from([start]);

    while let Some((q_states, p_states)) = queue.pop_front() {
        if accepting(&q_tokens, &q_states) && !accepting(&p_tokens, &p_states) {
            // A string reaching this pair matches q but not p.
            return false;
        }

        let key = (
            q_states.iter().copied().collect::<Vec<_>>(),
            p_states.iter().copied().collect::<Vec<_>>(),
        );
        if !seen.insert(key) {
            continue;
        }

        for &sym in &alphabet {
            let q_next = step(&q_tokens, &q_states, sym);
            if q_next.is_empty() {
                // No string with this prefix matches q; nothing to refute.
                continue;
            }
            let p_next = step(&p_tokens, &p_states, sym);
            queue.push_back((q_next, p_next));
        }
    }

    true
}
