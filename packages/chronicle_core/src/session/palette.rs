//! Shared palette of affirmed and banned words
//!
//! Two replicated sequences with set-like behavior enforced here: the
//! sequence type itself allows duplicates, so membership is checked
//! before every insert.

use std::sync::Arc;

use crate::convergent::{Container, DocStore, Value};

/// Sequence names of the palette container.
pub mod lists {
    pub const AFFIRMED_WORDS: &str = "affirmedWords";
    pub const BANNED_WORDS: &str = "bannedWords";
}

/// View over the palette container.
#[derive(Clone)]
pub struct PaletteView {
    store: Arc<DocStore>,
}

impl PaletteView {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self { store }
    }

    fn words(&self, list: &str) -> Vec<String> {
        self.store
            .list(Container::Palette, list)
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    }

    /// Append a word unless it is empty or already present.
    fn add(&self, list: &str, word: &str) -> bool {
        if word.is_empty() || self.words(list).iter().any(|w| w == word) {
            return false;
        }
        self.store.transact(|tx| {
            tx.append(Container::Palette, list, Value::string(word));
        });
        true
    }

    /// Erase every observed occurrence of a word.
    fn remove(&self, list: &str, word: &str) -> bool {
        let element = Value::string(word);
        let observed = self.store.append_ids(Container::Palette, list, &element);
        if observed.is_empty() {
            return false;
        }
        self.store.transact(|tx| {
            tx.erase(Container::Palette, list, element, observed);
        });
        true
    }

    pub fn affirmed_words(&self) -> Vec<String> {
        self.words(lists::AFFIRMED_WORDS)
    }

    pub fn banned_words(&self) -> Vec<String> {
        self.words(lists::BANNED_WORDS)
    }

    pub fn add_affirmed_word(&self, word: &str) -> bool {
        self.add(lists::AFFIRMED_WORDS, word)
    }

    pub fn remove_affirmed_word(&self, word: &str) -> bool {
        self.remove(lists::AFFIRMED_WORDS, word)
    }

    pub fn add_banned_word(&self, word: &str) -> bool {
        self.add(lists::BANNED_WORDS, word)
    }

    pub fn remove_banned_word(&self, word: &str) -> bool {
        self.remove(lists::BANNED_WORDS, word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> PaletteView {
        PaletteView::new(Arc::new(DocStore::new(1)))
    }

    #[test]
    fn test_add_and_list() {
        let palette = view();
        assert!(palette.add_affirmed_word("dragons"));
        assert!(palette.add_affirmed_word("prophecy"));
        assert_eq!(palette.affirmed_words(), vec!["dragons", "prophecy"]);
        assert!(palette.banned_words().is_empty());
    }

    #[test]
    fn test_duplicates_and_empties_rejected() {
        let palette = view();
        assert!(palette.add_banned_word("aliens"));
        assert!(!palette.add_banned_word("aliens"));
        assert!(!palette.add_banned_word(""));
        assert_eq!(palette.banned_words(), vec!["aliens"]);
    }

    #[test]
    fn test_remove_then_readd() {
        let palette = view();
        palette.add_affirmed_word("maps");
        assert!(palette.remove_affirmed_word("maps"));
        assert!(palette.affirmed_words().is_empty());
        assert!(!palette.remove_affirmed_word("maps"));

        // Removal does not ban the word forever
        assert!(palette.add_affirmed_word("maps"));
        assert_eq!(palette.affirmed_words(), vec!["maps"]);
    }
}
