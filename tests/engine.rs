//! End-to-end scenarios driving a pipeline through [`viewflow::builder`] and
//! inspecting the materialized state it produces, covering the composite
//! group/aggregate/pick behaviors worked through in the design doc.

use serde_json::json;
use viewflow::builder::create_pipeline;
use viewflow::materializer::to_json_array;
use viewflow::testing::{cities_and_venues, categorized_prices};
use viewflow::value::Item;

fn item(fields: serde_json::Value) -> Item {
    Item::from_map(fields.as_object().unwrap().clone())
}

#[test]
fn group_by_city_sums_capacity_and_tracks_removal() {
    let (source, state) = create_pipeline()
        .group_by(["city"], "venues")
        .unwrap()
        .sum("venues", "capacity", "total_capacity")
        .unwrap()
        .build_in_memory()
        .unwrap();

    for (key, venue) in cities_and_venues() {
        source.add(key, venue).unwrap();
    }

    let rendered = to_json_array(&state.borrow());
    let dallas = rendered.iter().find(|v| v["city"] == json!("Dallas")).unwrap();
    assert_eq!(dallas["total_capacity"], json!(70000.0));
    assert_eq!(dallas["venues"].as_array().unwrap().len(), 2);

    let austin = rendered.iter().find(|v| v["city"] == json!("Austin")).unwrap();
    assert_eq!(austin["total_capacity"], json!(40000.0));

    // Removing one Dallas venue updates the running total without touching
    // the other city's group.
    source.remove("v2", item(json!({"state": "TX", "city": "Dallas", "capacity": 50000}))).unwrap();
    let rendered = to_json_array(&state.borrow());
    let dallas = rendered.iter().find(|v| v["city"] == json!("Dallas")).unwrap();
    assert_eq!(dallas["total_capacity"], json!(20000.0));
    assert_eq!(dallas["venues"].as_array().unwrap().len(), 1);

    // Removing the last Dallas venue retires the group entirely.
    source.remove("v1", item(json!({"state": "TX", "city": "Dallas", "capacity": 20000}))).unwrap();
    let rendered = to_json_array(&state.borrow());
    assert!(rendered.iter().all(|v| v["city"] != json!("Dallas")));
    assert_eq!(rendered.len(), 2);
}

#[test]
fn nested_group_by_state_then_city_sums_capacity_per_city() {
    let (source, state) = create_pipeline()
        .group_by(["state"], "cities")
        .unwrap()
        .in_array("cities")
        .group_by(["city"], "venues")
        .unwrap()
        .sum("venues", "capacity", "total_capacity")
        .unwrap()
        .build_in_memory()
        .unwrap();

    for (key, venue) in cities_and_venues() {
        source.add(key, venue).unwrap();
    }

    let rendered = to_json_array(&state.borrow());
    let tx = rendered.iter().find(|v| v["state"] == json!("TX")).unwrap();
    let cities = tx["cities"].as_array().unwrap();
    let dallas = cities.iter().find(|c| c["city"] == json!("Dallas")).unwrap();
    assert_eq!(dallas["total_capacity"], json!(70000.0));
    let austin = cities.iter().find(|c| c["city"] == json!("Austin")).unwrap();
    assert_eq!(austin["total_capacity"], json!(40000.0));

    let ok = rendered.iter().find(|v| v["state"] == json!("OK")).unwrap();
    let tulsa = ok["cities"].as_array().unwrap()[0].clone();
    assert_eq!(tulsa["city"], json!("Tulsa"));
    assert_eq!(tulsa["total_capacity"], json!(18000.0));
}

#[test]
fn pick_by_min_recomputes_cheapest_after_winner_removed() {
    let (source, state) = create_pipeline()
        .group_by(["category"], "items")
        .unwrap()
        .pick_by_min("items", "price", "cheapest")
        .unwrap()
        .build_in_memory()
        .unwrap();

    let prices = categorized_prices();
    for (key, priced) in prices.iter().take(2).cloned() {
        source.add(key, priced).unwrap();
    }

    let rendered = to_json_array(&state.borrow());
    let produce = rendered.iter().find(|v| v["category"] == json!("produce")).unwrap();
    assert_eq!(produce["cheapest"]["price"], json!(1.5));

    // Removing the cheapest produce item promotes the remaining one.
    source.remove(prices[0].0.clone(), prices[0].1.clone()).unwrap();
    let rendered = to_json_array(&state.borrow());
    let produce = rendered.iter().find(|v| v["category"] == json!("produce")).unwrap();
    assert_eq!(produce["cheapest"]["price"], json!(2.25));
}

#[test]
fn average_skips_null_prices_within_a_group() {
    let (source, state) = create_pipeline()
        .group_by(["category"], "items")
        .unwrap()
        .average("items", "price", "average_price")
        .unwrap()
        .build_in_memory()
        .unwrap();

    for (key, priced) in categorized_prices() {
        source.add(key, priced).unwrap();
    }

    let rendered = to_json_array(&state.borrow());
    let produce = rendered.iter().find(|v| v["category"] == json!("produce")).unwrap();
    assert_eq!(produce["average_price"], json!((1.5 + 2.25) / 2.0));

    // Dairy has one priced item (3.0) and one null -- the null is excluded.
    let dairy = rendered.iter().find(|v| v["category"] == json!("dairy")).unwrap();
    assert_eq!(dairy["average_price"], json!(3.0));
}

#[test]
fn drop_array_prunes_members_but_keeps_the_aggregate() {
    let (source, state) = create_pipeline()
        .group_by(["city"], "venues")
        .unwrap()
        .sum("venues", "capacity", "total_capacity")
        .unwrap()
        .drop_array("venues")
        .unwrap()
        .build_in_memory()
        .unwrap();

    for (key, venue) in cities_and_venues() {
        source.add(key, venue).unwrap();
    }

    let rendered = to_json_array(&state.borrow());
    let dallas = rendered.iter().find(|v| v["city"] == json!("Dallas")).unwrap();
    assert_eq!(dallas["total_capacity"], json!(70000.0));
    assert!(dallas.get("venues").is_none());
}

#[test]
fn filter_then_group_by_excludes_nonmatching_items_from_groups() {
    let (source, state) = create_pipeline()
        .filter(std::rc::Rc::new(|item: &Item| item.get_f64("capacity").unwrap_or(0.0) >= 20000.0))
        .unwrap()
        .group_by(["city"], "venues")
        .unwrap()
        .count("venues", "venue_count")
        .unwrap()
        .build_in_memory()
        .unwrap();

    for (key, venue) in cities_and_venues() {
        source.add(key, venue).unwrap();
    }

    let rendered = to_json_array(&state.borrow());
    // Tulsa's only venue has capacity 18000 and is filtered out entirely.
    assert!(rendered.iter().all(|v| v["city"] != json!("Tulsa")));
    let dallas = rendered.iter().find(|v| v["city"] == json!("Dallas")).unwrap();
    assert_eq!(dallas["venue_count"], json!(2.0));
}
