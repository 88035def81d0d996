//! Groups already fetched listings by location.

use crate::model::post::{Location, PartialPost, Post};
use std::collections::BTreeMap;

/// Bucket for listings whose location lacks a city or a state.
pub const UNKNOWN_LOCATION: &str = "Other";

pub trait Located {
    fn location(&self) -> &Location;
}

impl Located for Post {
    fn location(&self) -> &Location {
        &self.content.location
    }
}

impl Located for PartialPost {
    fn location(&self) -> &Location {
        &self.content.location
    }
}

/// `state -> city -> listings`, keeping the input order inside each city.
pub type LocationGroups<T> = BTreeMap<String, BTreeMap<String, Vec<T>>>;

pub fn group_by_location<T: Located>(items: impl IntoIterator<Item = T>) -> LocationGroups<T> {
    let mut groups = LocationGroups::new();

    for item in items {
        let location = item.location();
        let state = location.state().unwrap_or(UNKNOWN_LOCATION).to_owned();
        let city = location.city().unwrap_or(UNKNOWN_LOCATION).to_owned();

        groups
            .entry(state)
            .or_insert_with(BTreeMap::new)
            .entry(city)
            .or_insert_with(Vec::new)
            .push(item);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::{Located, UNKNOWN_LOCATION, group_by_location};
    use crate::model::post::Location;

    struct Listing(&'static str, Location);

    impl Located for Listing {
        fn location(&self) -> &Location {
            &self.1
        }
    }

    fn listing(name: &'static str, location: &str) -> Listing {
        Listing(name, Location(location.to_owned()))
    }

    #[test]
    fn groups_by_state_then_city() {
        let groups = group_by_location([
            listing("a", "Houston, Texas, 77002"),
            listing("b", "Dallas, Texas, 75001"),
            listing("c", "Houston, Texas, 77003"),
            listing("d", "San Jose, California, 95112"),
        ]);

        assert_eq!(groups.len(), 2);
        let texas = &groups["Texas"];
        assert_eq!(texas.len(), 2);
        assert_eq!(
            texas["Houston"].iter().map(|l| l.0).collect::<Vec<_>>(),
            ["a", "c"]
        );
        assert_eq!(texas["Dallas"].len(), 1);
        assert_eq!(groups["California"]["San Jose"].len(), 1);
    }

    #[test]
    fn incomplete_locations_go_to_other() {
        let groups = group_by_location([listing("a", "Houston"), listing("b", "")]);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[UNKNOWN_LOCATION]["Houston"].len(), 1);
        assert_eq!(groups[UNKNOWN_LOCATION][UNKNOWN_LOCATION].len(), 1);
    }
}
