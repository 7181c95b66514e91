//! Item queue
//!
//! An [`ItemQueue`] is an immutable snapshot of ordered elements plus the
//! current [`ItemTransition`]. Updates produce new snapshots. The current
//! index and element are derived by identity matching, never by position:
//! a transition referencing an item absent from the elements resolves to
//! [`Current::Invalid`].

use crate::engine::NativeItem;
use crate::transition::{ItemTransition, Matches};

/// Resolution of the current element or index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Current<T> {
    /// Resolved, possibly to nothing
    Valid(Option<T>),
    /// The transition references an item missing from the queue
    Invalid,
}

impl<T> Current<T> {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Current::Invalid)
    }

    /// The resolved value, `None` when nothing is current or invalid
    pub fn value(self) -> Option<T> {
        match self {
            Current::Valid(value) => value,
            Current::Invalid => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Current<U> {
        match self {
            Current::Valid(value) => Current::Valid(value.map(f)),
            Current::Invalid => Current::Invalid,
        }
    }
}

/// Index of the current element
pub type ItemIndex = Current<usize>;

/// Reducer input
#[derive(Debug, Clone)]
pub enum ItemQueueUpdate<T, R = NativeItem> {
    /// New elements, the transition is kept
    Elements(Vec<T>),
    /// New transition, the elements are kept
    Transition(ItemTransition<R>),
}

/// Queue snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ItemQueue<T, R = NativeItem> {
    elements: Vec<T>,
    transition: ItemTransition<R>,
}

impl<T, R> ItemQueue<T, R> {
    /// Create a queue. An empty queue always advances to nothing.
    pub fn new(elements: Vec<T>, transition: ItemTransition<R>) -> Self {
        let transition = if elements.is_empty() {
            ItemTransition::Advance(None)
        } else {
            transition
        };
        Self {
            elements,
            transition,
        }
    }

    /// Empty queue
    pub fn initial() -> Self {
        Self::new(Vec::new(), ItemTransition::Advance(None))
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    pub fn transition(&self) -> &ItemTransition<R> {
        &self.transition
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn into_parts(self) -> (Vec<T>, ItemTransition<R>) {
        (self.elements, self.transition)
    }
}

impl<T: Clone, R: Clone> ItemQueue<T, R> {
    pub fn with_elements(&self, elements: Vec<T>) -> Self {
        Self::new(elements, self.transition.clone())
    }

    pub fn with_transition(&self, transition: ItemTransition<R>) -> Self {
        Self::new(self.elements.clone(), transition)
    }

    /// Apply an update
    pub fn updated(&self, update: ItemQueueUpdate<T, R>) -> Self {
        match update {
            ItemQueueUpdate::Elements(elements) => self.with_elements(elements),
            ItemQueueUpdate::Transition(transition) => self.with_transition(transition),
        }
    }
}

impl<T: Matches<R>, R> ItemQueue<T, R> {
    fn position_of(&self, item: &R) -> Option<usize> {
        self.elements.iter().position(|element| element.matches(item))
    }

    pub fn current_index(&self) -> ItemIndex {
        match &self.transition {
            ItemTransition::Advance(Some(item)) | ItemTransition::Stop(item) => {
                match self.position_of(item) {
                    Some(index) => Current::Valid(Some(index)),
                    None => Current::Invalid,
                }
            }
            ItemTransition::Advance(None) if !self.elements.is_empty() => Current::Valid(Some(0)),
            ItemTransition::Advance(None) | ItemTransition::Finish => Current::Valid(None),
        }
    }

    pub fn current_element(&self) -> Current<&T> {
        self.current_index().map(|index| &self.elements[index])
    }

    /// Index to recover from an invalid transition after an element edit.
    ///
    /// Returns the index of the first element which followed the current
    /// element of `previous` and survived the edit, if any.
    pub fn recovery_index(&self, previous: &ItemQueue<T, R>) -> Option<usize>
    where
        T: Matches<T>,
    {
        let Current::Valid(Some(index)) = previous.current_index() else {
            return None;
        };
        previous.elements[index + 1..].iter().find_map(|candidate| {
            self.elements
                .iter()
                .position(|element| element.matches(candidate))
        })
    }
}

impl<T, R> Default for ItemQueue<T, R> {
    fn default() -> Self {
        Self::initial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Element identified by a number, carrying an unrelated payload
    #[derive(Debug, Clone, PartialEq)]
    struct Element {
        id: u32,
        payload: &'static str,
    }

    fn element(id: u32) -> Element {
        Element { id, payload: "" }
    }

    impl Matches<u32> for Element {
        fn matches(&self, item: &u32) -> bool {
            self.id == *item
        }
    }

    impl Matches<Element> for Element {
        fn matches(&self, other: &Element) -> bool {
            self.id == other.id
        }
    }

    type Queue = ItemQueue<Element, u32>;

    #[test]
    fn test_advance_to_nothing_selects_head() {
        for count in 1..5 {
            let queue = Queue::new((0..count).map(element).collect(), ItemTransition::Advance(None));
            assert_eq!(queue.current_index(), Current::Valid(Some(0)));
            assert_eq!(queue.current_element(), Current::Valid(Some(&element(0))));
        }
    }

    #[test]
    fn test_empty_queue_forces_advance_to_nothing() {
        let transitions = [
            ItemTransition::Advance(Some(3)),
            ItemTransition::Stop(3),
            ItemTransition::Finish,
            ItemTransition::Advance(None),
        ];
        for transition in transitions {
            let queue = Queue::new(Vec::new(), transition);
            assert_eq!(queue.transition(), &ItemTransition::Advance(None));
            assert_eq!(queue.current_index(), Current::Valid(None));
            assert_eq!(queue.current_element(), Current::Valid(None));
        }
    }

    #[test]
    fn test_missing_item_is_invalid() {
        let elements = vec![element(1), element(2)];
        for transition in [ItemTransition::Advance(Some(7)), ItemTransition::Stop(7)] {
            let queue = Queue::new(elements.clone(), transition);
            assert_eq!(queue.current_index(), Current::Invalid);
            assert_eq!(queue.current_element(), Current::Invalid);
        }
    }

    #[test]
    fn test_finish_resolves_to_nothing() {
        let queue = Queue::new(vec![element(1)], ItemTransition::Finish);
        assert_eq!(queue.current_index(), Current::Valid(None));
    }

    #[test]
    fn test_first_match_wins() {
        let queue = Queue::new(
            vec![
                element(1),
                Element { id: 2, payload: "first" },
                Element { id: 2, payload: "second" },
            ],
            ItemTransition::Stop(2),
        );
        assert_eq!(queue.current_index(), Current::Valid(Some(1)));
        assert_eq!(queue.current_element().value().map(|e| e.payload), Some("first"));
    }

    #[test]
    fn test_with_elements_is_idempotent() {
        let queue = Queue::new(vec![element(1), element(2)], ItemTransition::Advance(Some(2)));
        let elements = vec![element(2), element(3)];
        let first = queue.with_elements(elements.clone());
        let second = first.with_elements(elements);
        assert_eq!(first.current_index(), second.current_index());
        assert_eq!(first.current_element(), second.current_element());
        assert_eq!(first, second);
    }

    #[test]
    fn test_updated() {
        let queue = Queue::initial().updated(ItemQueueUpdate::Elements(vec![element(1), element(2)]));
        assert_eq!(queue.current_index(), Current::Valid(Some(0)));

        let queue = queue.updated(ItemQueueUpdate::Transition(ItemTransition::Stop(2)));
        assert_eq!(queue.current_index(), Current::Valid(Some(1)));

        // Emptying the queue resets the transition, it is not restored afterwards
        let queue = queue
            .updated(ItemQueueUpdate::Elements(Vec::new()))
            .updated(ItemQueueUpdate::Elements(vec![element(1), element(2)]));
        assert_eq!(queue.current_index(), Current::Valid(Some(0)));
    }

    #[test]
    fn test_recovery_index() {
        let previous = Queue::new(
            vec![element(1), element(2), element(3), element(4)],
            ItemTransition::Advance(Some(2)),
        );

        // Current and its direct follower removed
        let edited = previous.with_elements(vec![element(1), element(4)]);
        assert!(edited.current_index().is_invalid());
        assert_eq!(edited.recovery_index(&previous), Some(1));

        // Nothing survived after the current element
        let edited = previous.with_elements(vec![element(1)]);
        assert_eq!(edited.recovery_index(&previous), None);
    }
}
