use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::credential::Credential;

/// Shared pile of keys that have not been handed to a worker yet, plus the
/// full immutable key list.
///
/// Keys leave the pile once and are never returned to it; a retired key is
/// simply dropped by its worker.
#[derive(Debug)]
pub struct KeySupply {
    all: Arc<[Credential]>,
    pile: Mutex<VecDeque<Credential>>,
}

impl KeySupply {
    pub fn new(keys: Vec<Credential>) -> Self {
        let pile = keys.iter().cloned().collect();
        Self {
            all: keys.into(),
            pile: Mutex::new(pile),
        }
    }

    /// Non-blocking take from the pile.
    pub fn take(&self) -> Option<Credential> {
        self.pile.lock().pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.pile.lock().len()
    }

    pub fn all(&self) -> &[Credential] {
        &self.all
    }

    pub fn by_index(&self, index: usize) -> Option<&Credential> {
        self.all.iter().find(|k| k.index == index)
    }

    pub fn indices(&self) -> Vec<usize> {
        self.all.iter().map(|k| k.index).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pile_drains_in_order() {
        let supply = KeySupply::new(vec![Credential::new(1, "k1"), Credential::new(2, "k2")]);
        assert_eq!(supply.take().map(|k| k.index), Some(1));
        assert_eq!(supply.take().map(|k| k.index), Some(2));
        assert!(supply.take().is_none());
        assert_eq!(supply.remaining(), 0);
        // The full list survives
        assert_eq!(supply.indices(), vec![1, 2]);
        assert_eq!(supply.by_index(2).map(|k| k.secret()), Some("k2"));
    }
}
