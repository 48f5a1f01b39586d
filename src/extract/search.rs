use std::borrow::Cow;
use std::collections::VecDeque;

use serde_json::Value;

use super::json::{decode_embedded, JsonExt};

/// Deepest level the search descends to below the root.
pub const MAX_DEPTH: usize = 10;

const SKIPPED_KEYS: &[&str] = &["tracking", "analytics", "meta", "features", "media", "images"];
const ID_KEYS: &[&str] = &["listingId", "id"];
const URL_KEYS: &[&str] = &[
    "url",
    "listingUrl",
    "listingSlug",
    "prettyUrl",
    "canonicalUrl",
    "_links",
];
const ADDRESS_KEYS: &[&str] = &[
    "address",
    "displayAddress",
    "displayableAddress",
    "listingModel",
];

/// An object with an identifier plus a URL-like or address-like sibling.
pub fn is_listing_candidate(value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    let has_id = ID_KEYS.iter().any(|key| value.id_at(key).is_some());
    let has_context = URL_KEYS
        .iter()
        .chain(ADDRESS_KEYS)
        .any(|key| map.get(*key).is_some_and(|v| !v.is_null()));
    has_id && has_context
}

/// Breadth-first search for the first collection of listing-shaped objects.
///
/// Arrays and id-keyed maps are checked as a group before their members are
/// queued, so a results array wins over the page object that holds it. Members
/// that wrap their listing (`{"pin": .., "listing": {..}}`) are unwrapped as a
/// group too. A lone candidate object is returned only when no group qualified
/// first.
pub fn find_listing_candidates(root: &Value) -> Vec<Value> {
    let mut queue: VecDeque<(Cow<'_, Value>, usize)> = VecDeque::new();
    queue.push_back((decode_embedded(Cow::Borrowed(root)), 0));

    while let Some((node, depth)) = queue.pop_front() {
        let members: Vec<Cow<'_, Value>> = match &node {
            Cow::Borrowed(value) => children(*value)
                .map(|child| decode_embedded(Cow::Borrowed(child)))
                .collect(),
            Cow::Owned(value) => children(value)
                .map(|child| decode_embedded(Cow::Owned(child.clone())))
                .collect(),
        };

        let group: Vec<Value> = members
            .iter()
            .filter(|member| is_listing_candidate(member))
            .map(|member| member.as_ref().clone())
            .collect();
        if !group.is_empty() {
            return group;
        }
        if depth < MAX_DEPTH {
            let wrapped = wrapped_group(&members);
            if !wrapped.is_empty() {
                return wrapped;
            }
        }
        if depth > 0 && is_listing_candidate(&node) {
            return vec![node.into_owned()];
        }

        if depth < MAX_DEPTH {
            queue.extend(members.into_iter().map(|member| (member, depth + 1)));
        }
    }

    Vec::new()
}

/// Candidates one level below each member, in member order.
fn wrapped_group(members: &[Cow<'_, Value>]) -> Vec<Value> {
    members
        .iter()
        .flat_map(|member| {
            children(member.as_ref())
                .map(|child| decode_embedded(Cow::Borrowed(child)))
                .filter(|child| is_listing_candidate(child))
                .map(Cow::into_owned)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn children(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        Value::Object(map) => Box::new(
            map.iter()
                .filter(|(key, _)| !SKIPPED_KEYS.contains(&key.as_str()))
                .map(|(_, child)| child),
        ),
        _ => Box::new(std::iter::empty()),
    }
}
