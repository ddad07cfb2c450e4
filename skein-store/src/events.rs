//! Encoding of store mutations as self-describing event values.
//!
//! Every successful mutation a store actor observes is published to
//! `store_events/<store_name>` as a `Data` vector whose first slot names the
//! mutation. Consumers read events without linking against store-internal
//! types, so the layout is part of the wire contract:
//!
//! | mutation | layout |
//! |---|---|
//! | insert | `["insert", store, key, value, expiry?, publisher]` |
//! | update | `["update", store, key, old, new, expiry?, publisher]` |
//! | erase  | `["erase", store, key, publisher]` |
//! | expire | `["expire", store, key, publisher]` |
//!
//! The publisher occupies two slots, `(endpoint, object)`, both `nil` for
//! anonymous publishers; the optional expiry occupies one slot holding a
//! timespan or `nil`.

use skein_core::{Data, EntityId, Timespan};

fn push_expiry(xs: &mut Vec<Data>, expiry: Option<Timespan>) {
    match expiry {
        Some(span) => xs.push(Data::Timespan(span)),
        None => xs.push(Data::None),
    }
}

fn push_publisher(xs: &mut Vec<Data>, publisher: EntityId) {
    match publisher.endpoint {
        Some(endpoint) => {
            xs.push(Data::from(endpoint.to_string()));
            xs.push(Data::Count(publisher.object.value()));
        }
        None => {
            xs.push(Data::None);
            xs.push(Data::None);
        }
    }
}

/// Encode an insert event.
pub fn insert(
    store_name: &str,
    key: &Data,
    value: &Data,
    expiry: Option<Timespan>,
    publisher: EntityId,
) -> Data {
    let mut xs = Vec::with_capacity(7);
    xs.push(Data::from("insert"));
    xs.push(Data::from(store_name));
    xs.push(key.clone());
    xs.push(value.clone());
    push_expiry(&mut xs, expiry);
    push_publisher(&mut xs, publisher);
    Data::Vector(xs)
}

/// Encode an update event carrying the pre-write and post-write values.
pub fn update(
    store_name: &str,
    key: &Data,
    old_value: &Data,
    new_value: &Data,
    expiry: Option<Timespan>,
    publisher: EntityId,
) -> Data {
    let mut xs = Vec::with_capacity(8);
    xs.push(Data::from("update"));
    xs.push(Data::from(store_name));
    xs.push(key.clone());
    xs.push(old_value.clone());
    xs.push(new_value.clone());
    push_expiry(&mut xs, expiry);
    push_publisher(&mut xs, publisher);
    Data::Vector(xs)
}

/// Encode an erase event.
pub fn erase(store_name: &str, key: &Data, publisher: EntityId) -> Data {
    let mut xs = Vec::with_capacity(5);
    xs.push(Data::from("erase"));
    xs.push(Data::from(store_name));
    xs.push(key.clone());
    push_publisher(&mut xs, publisher);
    Data::Vector(xs)
}

/// Encode an expire event.
pub fn expire(store_name: &str, key: &Data, publisher: EntityId) -> Data {
    let mut xs = Vec::with_capacity(5);
    xs.push(Data::from("expire"));
    xs.push(Data::from(store_name));
    xs.push(key.clone());
    push_publisher(&mut xs, publisher);
    Data::Vector(xs)
}
