//! Hostmask patterns and the ignore list built on them.
//!
//! A pattern is either `nick!user@host` with `*`/`?` wildcards, matched
//! case-insensitively, or `account:<name>` which matches the sender's
//! services account exactly (ignoring case).

use parking_lot::RwLock;

use crate::message::Sender;

const ACCOUNT_PREFIX: &str = "account:";

/// Whether `pattern` covers `sender`.
pub fn mask_matches(pattern: &str, sender: &Sender) -> bool {
    if let Some(account) = pattern.strip_prefix(ACCOUNT_PREFIX) {
        return sender
            .account
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(account));
    }
    wildcard_match(pattern, &sender.hostmask())
}

/// Case-insensitive glob match supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();
    glob(pattern.as_bytes(), text.as_bytes())
}

/// Two-pointer matcher that backtracks only to the most recent `*`.
/// Worst case O(pattern * text).
fn glob(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // (index of the last `*`, text position it currently absorbs up to)
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, t));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

/// Decides whether inbound traffic from a sender is dropped.
pub trait IgnorePredicate: Send + Sync {
    fn is_ignored(&self, sender: &Sender) -> bool;
}

/// Nothing is ignored.
impl IgnorePredicate for () {
    fn is_ignored(&self, _: &Sender) -> bool {
        false
    }
}

/// Mutable list of ignore masks.
#[derive(Debug, Default)]
pub struct IgnoreList {
    masks: RwLock<Vec<String>>,
}

impl IgnoreList {
    pub fn new(masks: impl IntoIterator<Item = String>) -> Self {
        IgnoreList {
            masks: RwLock::new(masks.into_iter().collect()),
        }
    }

    /// Returns false if the mask was already present.
    pub fn add(&self, mask: &str) -> bool {
        let mut masks = self.masks.write();
        if masks.iter().any(|m| m.eq_ignore_ascii_case(mask)) {
            return false;
        }
        masks.push(mask.to_string());
        true
    }

    /// Returns false if the mask was not present.
    pub fn remove(&self, mask: &str) -> bool {
        let mut masks = self.masks.write();
        let before = masks.len();
        masks.retain(|m| !m.eq_ignore_ascii_case(mask));
        masks.len() != before
    }

    pub fn masks(&self) -> Vec<String> {
        self.masks.read().clone()
    }
}

impl IgnorePredicate for IgnoreList {
    fn is_ignored(&self, sender: &Sender) -> bool {
        self.masks.read().iter().any(|m| mask_matches(m, sender))
    }
}
