//! Optimistic local state for favorites and view counts.
//!
//! The local value changes before the remote write is sent. Settling with the
//! remote outcome keeps it or puts the previous value back.

use crate::model::{Id, post::PostMarker};
use std::collections::HashSet;

/// The remote write a toggle needs.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum FavoriteWrite {
    Insert(Id<PostMarker>),
    Delete(Id<PostMarker>),
}

/// A toggle whose remote write has not settled yet.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
#[must_use = "a pending toggle has to be settled"]
pub struct PendingToggle {
    post: Id<PostMarker>,
    was_favorite: bool,
}

impl PendingToggle {
    #[must_use]
    pub fn write(self) -> FavoriteWrite {
        if self.was_favorite {
            FavoriteWrite::Delete(self.post)
        } else {
            FavoriteWrite::Insert(self.post)
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct FavoriteSet {
    posts: HashSet<Id<PostMarker>>,
}

impl FavoriteSet {
    #[must_use]
    pub fn new(posts: impl IntoIterator<Item = Id<PostMarker>>) -> Self {
        Self {
            posts: posts.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, post: Id<PostMarker>) -> bool {
        self.posts.contains(&post)
    }

    pub fn begin_toggle(&mut self, post: Id<PostMarker>) -> PendingToggle {
        let was_favorite = self.posts.contains(&post);
        if was_favorite {
            self.posts.remove(&post);
        } else {
            self.posts.insert(post);
        }

        PendingToggle { post, was_favorite }
    }

    /// Keeps the toggled state on success, restores the old one on failure.
    pub fn settle<E>(&mut self, pending: PendingToggle, outcome: &Result<(), E>) {
        if outcome.is_err() {
            if pending.was_favorite {
                self.posts.insert(pending.post);
            } else {
                self.posts.remove(&pending.post);
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct ViewCounter {
    count: i64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
#[must_use = "a pending increment has to be settled"]
pub struct PendingIncrement {
    previous: i64,
}

impl ViewCounter {
    #[must_use]
    pub fn new(count: i64) -> Self {
        Self { count }
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.count
    }

    pub fn begin_increment(&mut self) -> PendingIncrement {
        let previous = self.count;
        self.count += 1;
        PendingIncrement { previous }
    }

    /// On success the server's count wins, since other viewers may have counted too.
    pub fn settle<E>(&mut self, pending: PendingIncrement, outcome: &Result<i64, E>) {
        self.count = match outcome {
            Ok(remote) => (*remote).max(self.count),
            Err(_) => pending.previous,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::{FavoriteSet, FavoriteWrite, ViewCounter};
    use crate::model::Id;

    #[test]
    fn toggle_flips_immediately_and_survives_success() {
        let post = Id::from(10);
        let mut favorites = FavoriteSet::default();

        let pending = favorites.begin_toggle(post);
        assert!(favorites.contains(post));
        assert_eq!(pending.write(), FavoriteWrite::Insert(post));

        favorites.settle::<()>(pending, &Ok(()));
        assert!(favorites.contains(post));
    }

    #[test]
    fn failed_remote_write_reverts_the_toggle() {
        let post = Id::from(10);
        let mut favorites = FavoriteSet::default();

        let pending = favorites.begin_toggle(post);
        assert!(favorites.contains(post));
        favorites.settle(pending, &Err("network down"));
        assert!(!favorites.contains(post));

        let mut favorites = FavoriteSet::new([post]);
        let pending = favorites.begin_toggle(post);
        assert_eq!(pending.write(), FavoriteWrite::Delete(post));
        assert!(!favorites.contains(post));
        favorites.settle(pending, &Err("network down"));
        assert!(favorites.contains(post));
    }

    #[test]
    fn view_count_rolls_back_on_failure() {
        let mut views = ViewCounter::new(41);

        let pending = views.begin_increment();
        assert_eq!(views.get(), 42);
        views.settle(pending, &Err(()));
        assert_eq!(views.get(), 41);

        let pending = views.begin_increment();
        views.settle::<()>(pending, &Ok(50));
        assert_eq!(views.get(), 50);
    }
}
