//! Store tests against an in-memory SQLite database.
//!
//! Each test opens its own single-connection pool, so no external service is
//! needed. Run with: cargo test --package trellis-graph --test store

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::Row;
use uuid::Uuid;

use trellis_core::config::{DatabaseConfig, StoreConfig};
use trellis_core::fieldtype::FieldType;
use trellis_core::policy::{EdgePolicy, ObjectPolicy};
use trellis_core::registry::{EdgeTypeConfig, ObjectTypeConfig, Schema, TimeField};
use trellis_core::types::{Data, EdgeRow, GeoPoint, Status, TypeCode, IDENTITY_EDGE};
use trellis_core::Viewer;
use trellis_graph::{GraphStore, NewEdge, Statement};

const PROFILE: TypeCode = 0;
const PLACE: TypeCode = 1;
const NOTE: TypeCode = 2;
const FOLLOWS: TypeCode = 5;
const FOLLOWED_BY: TypeCode = 6;
const FRIENDS: TypeCode = 7;
const AUTHORED: TypeCode = 8;
const PROFILE_SEARCH: TypeCode = 20;
const REMIND: TypeCode = 30;

fn schema(places_root: Uuid) -> Schema {
    Schema::builder()
        .object(
            PROFILE,
            ObjectTypeConfig::new("profile")
                .policy(ObjectPolicy::Profile)
                .field("handle", FieldType::string())
                .field("birthday", FieldType::date())
                .unique_index("handle")
                .index("tags")
                .time_index(TimeField::Created)
                .time_index(TimeField::Updated)
                .time_index(TimeField::Data("birthday".to_string()))
                .text_index(PROFILE_SEARCH, ["name", "bio"]),
        )
        .object(
            PLACE,
            ObjectTypeConfig::new("place")
                .policy(ObjectPolicy::PublicViewerEdge(vec![]))
                .geo_index("location")
                .root(places_root),
        )
        .object(
            NOTE,
            ObjectTypeConfig::new("note")
                .policy(ObjectPolicy::ViewerWrite)
                .field("text", FieldType::string())
                .field("about", FieldType::uuid_of([PROFILE]).nullable())
                .strict(),
        )
        .edge(
            FOLLOWS,
            EdgeTypeConfig::new("follows")
                .policy(EdgePolicy::PublicViewerWrite)
                .from_types([PROFILE])
                .to_types([PROFILE])
                .reverse(FOLLOWED_BY),
        )
        .edge(
            FOLLOWED_BY,
            EdgeTypeConfig::new("followed_by").policy(EdgePolicy::PublicViewerWrite),
        )
        .edge(
            FRIENDS,
            EdgeTypeConfig::new("friends")
                .policy(EdgePolicy::ViewerWrite)
                .from_types([PROFILE])
                .to_types([PROFILE])
                .symmetric(),
        )
        .edge(
            AUTHORED,
            EdgeTypeConfig::new("authored")
                .policy(EdgePolicy::ObjectCreatorWrite)
                .from_types([PROFILE])
                .to_types([NOTE]),
        )
        .build()
        .unwrap()
}

async fn open() -> (GraphStore, Uuid) {
    let places_root = Uuid::now_v7();
    let store = GraphStore::connect(&StoreConfig::in_memory(), Arc::new(schema(places_root)))
        .await
        .unwrap();
    (store, places_root)
}

fn data(value: Value) -> Data {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

async fn profile(store: &GraphStore, fields: Value) -> Uuid {
    store
        .create_object(&Viewer::write_all(), PROFILE, data(fields))
        .await
        .unwrap()
        .unwrap()
}

async fn count(store: &GraphStore, stmt: Statement) -> i64 {
    let row = store.client().query_one(&stmt).await.unwrap().unwrap();
    row.get::<i64, _>("n")
}

async fn index_rows(store: &GraphStore, id: Uuid) -> i64 {
    let mut total = count(
        store,
        Statement::new("SELECT COUNT(*) AS n FROM indices WHERE value = ?").bind(id),
    )
    .await;
    for table in ["geoindices", "dateindices", "ftsindices", "deferindices"] {
        total += count(
            store,
            Statement::new(format!("SELECT COUNT(*) AS n FROM {table} WHERE id = ?")).bind(id),
        )
        .await;
    }
    total
}

// ── Privacy ──────────────────────────────────────────────────────

#[tokio::test]
async fn profile_is_visible_only_to_itself() {
    let (store, _) = open().await;
    let a = profile(&store, json!({"handle": "ada", "name": "Ada"})).await;
    let b = profile(&store, json!({"handle": "bo", "name": "Bo"})).await;

    assert!(store.get_object(&Viewer::new(b), a).await.unwrap().is_none());
    assert!(store
        .get_object(&Viewer::logged_out(), a)
        .await
        .unwrap()
        .is_none());

    let own = store.get_object(&Viewer::new(a), a).await.unwrap().unwrap();
    assert_eq!(own.field("handle"), Some(&json!("ada")));
    assert!(store
        .get_object(&Viewer::read_all(), a)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn profile_creation_is_system_only() {
    let (store, _) = open().await;
    let a = profile(&store, json!({"handle": "ada"})).await;
    let err = store
        .create_object(&Viewer::new(a), PROFILE, data(json!({"handle": "eve"})))
        .await
        .unwrap_err();
    assert!(err.is_denied());
}

#[tokio::test]
async fn hidden_and_missing_look_the_same() {
    let (store, _) = open().await;
    let a = profile(&store, json!({"handle": "ada"})).await;
    let stranger = Viewer::new(Uuid::now_v7());
    let hidden = store.get_object(&stranger, a).await.unwrap();
    let missing = store.get_object(&stranger, Uuid::now_v7()).await.unwrap();
    assert_eq!(hidden, missing);
}

// ── Objects ──────────────────────────────────────────────────────

#[tokio::test]
async fn unique_handle_conflicts_but_own_edits_pass() {
    let (store, _) = open().await;
    let nova = profile(&store, json!({"handle": "nova", "name": "Nova"})).await;

    let err = store
        .create_object(&Viewer::write_all(), PROFILE, data(json!({"handle": "nova"})))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let me = Viewer::new(nova);
    assert!(store
        .modify_object_data(&me, nova, data(json!({"bio": "stargazer"})))
        .await
        .unwrap());
    assert!(store
        .modify_object_data(&me, nova, data(json!({"handle": "nova"})))
        .await
        .unwrap());
    assert_eq!(
        store
            .lookup_index(PROFILE, "handle", &json!("nova"))
            .await
            .unwrap(),
        vec![nova]
    );
}

#[tokio::test]
async fn modify_merges_instead_of_replacing() {
    let (store, _) = open().await;
    let id = profile(
        &store,
        json!({"handle": "lin", "name": "Lin", "bio": "old", "tags": ["rust"]}),
    )
    .await;
    let me = Viewer::new(id);

    assert!(store
        .modify_object_data(&me, id, data(json!({"bio": "new", "city": "Oslo"})))
        .await
        .unwrap());

    let reader = Viewer::read_all();
    let object = store.get_object(&reader, id).await.unwrap().unwrap();
    assert_eq!(object.field("name"), Some(&json!("Lin")));
    assert_eq!(object.field("bio"), Some(&json!("new")));
    assert_eq!(object.field("city"), Some(&json!("Oslo")));
    assert_eq!(object.field("tags"), Some(&json!(["rust"])));
}

#[tokio::test]
async fn changed_index_values_move() {
    let (store, _) = open().await;
    let id = profile(&store, json!({"handle": "kai", "tags": ["go", "rust"]})).await;
    let me = Viewer::new(id);

    store
        .modify_object_data(&me, id, data(json!({"tags": ["rust", "zig"], "handle": "kai2"})))
        .await
        .unwrap();

    assert!(store
        .lookup_index(PROFILE, "tags", &json!("go"))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store.lookup_index(PROFILE, "tags", &json!("zig")).await.unwrap(),
        vec![id]
    );
    assert!(store
        .lookup_index(PROFILE, "handle", &json!("kai"))
        .await
        .unwrap()
        .is_empty());

    // The old handle is free again.
    profile(&store, json!({"handle": "kai"})).await;
}

#[tokio::test]
async fn strict_types_reject_bad_payloads() {
    let (store, _) = open().await;
    let writer = Viewer::write_all();

    let err = store
        .create_object(&writer, NOTE, data(json!({"text": 5})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        trellis_core::TrellisError::SchemaMismatch { .. }
    ));

    let err = store
        .create_object(&writer, NOTE, data(json!({"text": "hi", "mood": "sunny"})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        trellis_core::TrellisError::SchemaMismatch { .. }
    ));

    let err = store
        .create_object(&writer, NOTE, Data::new())
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::TrellisError::Validation { .. }));
}

#[tokio::test]
async fn uuid_fields_check_the_referenced_type() {
    let (store, _) = open().await;
    let writer = Viewer::write_all();
    let person = profile(&store, json!({"handle": "ref"})).await;
    let place = store
        .create_object(&writer, PLACE, data(json!({"name": "Cafe"})))
        .await
        .unwrap()
        .unwrap();

    assert!(store
        .create_object(&writer, NOTE, data(json!({"text": "a", "about": person.to_string()})))
        .await
        .is_ok());
    assert!(store
        .create_object(&writer, NOTE, data(json!({"text": "b", "about": place.to_string()})))
        .await
        .is_err());
    // Unresolvable ids are accepted.
    assert!(store
        .create_object(
            &writer,
            NOTE,
            data(json!({"text": "c", "about": Uuid::now_v7().to_string()}))
        )
        .await
        .is_ok());
}

// ── Edges ────────────────────────────────────────────────────────

#[tokio::test]
async fn reverse_edge_is_written_with_the_forward_edge() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let y = profile(&store, json!({"handle": "y"})).await;

    let follow = EdgeRow::new(x, FOLLOWS, y);
    assert!(store.create_edge(&Viewer::new(x), &follow).await.unwrap());

    let reader = Viewer::read_all();
    assert!(store
        .get_single_edge(&reader, y, FOLLOWED_BY, x)
        .await
        .unwrap()
        .is_some());
    assert_eq!(store.get_edge(&reader, x, FOLLOWS).await.unwrap().len(), 1);

    let again = store.create_edge(&Viewer::new(x), &follow).await.unwrap_err();
    assert!(again.is_conflict());
}

#[tokio::test]
async fn strangers_cannot_link_other_objects() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let y = profile(&store, json!({"handle": "y"})).await;
    let stranger = Viewer::new(Uuid::now_v7());

    let err = store
        .create_edge(&stranger, &EdgeRow::new(x, FOLLOWS, y))
        .await
        .unwrap_err();
    assert!(err.is_denied());
    assert!(store
        .get_single_edge(&Viewer::read_all(), x, FOLLOWS, y)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn endpoint_types_are_enforced() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let place = store
        .create_object(&Viewer::write_all(), PLACE, data(json!({"name": "Pier"})))
        .await
        .unwrap()
        .unwrap();

    let err = store
        .create_edge(&Viewer::write_all(), &EdgeRow::new(x, FOLLOWS, place))
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::TrellisError::Validation { .. }));

    let err = store
        .create_edge(&Viewer::write_all(), &EdgeRow::new(x, FOLLOWS, Uuid::now_v7()))
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::TrellisError::Validation { .. }));
}

#[tokio::test]
async fn half_written_pairs_are_never_created() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let y = profile(&store, json!({"handle": "y"})).await;

    // A stray mirror row already exists without its forward edge.
    store
        .client()
        .run(
            &Statement::new(
                "INSERT INTO edges (from_id, type, to_id, data, status, time_created, time_updated)
                 VALUES (?, ?, ?, '', 0, 0, 0)",
            )
            .bind(y)
            .bind(FOLLOWED_BY)
            .bind(x),
        )
        .await
        .unwrap();

    let err = store
        .create_edge(&Viewer::new(x), &EdgeRow::new(x, FOLLOWS, y))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(store
        .get_single_edge(&Viewer::read_all(), x, FOLLOWS, y)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn symmetric_edges_change_as_a_pair() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let y = profile(&store, json!({"handle": "y"})).await;

    let friends = EdgeRow::new(x, FRIENDS, y).with_data("since 2019");
    assert!(store.create_edge(&Viewer::new(x), &friends).await.unwrap());

    let reader = Viewer::read_all();
    let mirror = store
        .get_single_edge(&reader, y, FRIENDS, x)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror.data(), "since 2019");

    let updated = friends.clone().with_data("since 2018");
    assert!(store
        .modify_edge_data(&Viewer::new(y), &updated)
        .await
        .unwrap());
    let reader = Viewer::read_all();
    for (from, to) in [(x, y), (y, x)] {
        let edge = store
            .get_single_edge(&reader, from, FRIENDS, to)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.data(), "since 2018");
    }

    assert!(store.delete_edge(&Viewer::new(y), &friends).await.unwrap());
    let reader = Viewer::read_all();
    assert!(store
        .get_single_edge(&reader, x, FRIENDS, y)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .get_single_edge(&reader, y, FRIENDS, x)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn symmetric_self_loop_is_one_row() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;

    assert!(store
        .create_edge(&Viewer::new(x), &EdgeRow::new(x, FRIENDS, x))
        .await
        .unwrap());
    let rows = count(
        &store,
        Statement::new("SELECT COUNT(*) AS n FROM edges WHERE from_id = ? AND type = ?")
            .bind(x)
            .bind(FRIENDS),
    )
    .await;
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn edge_writes_refresh_the_callers_cache() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let y = profile(&store, json!({"handle": "y"})).await;
    let me = Viewer::new(x);

    assert!(store.get_edge(&me, x, FOLLOWS).await.unwrap().is_empty());
    store
        .create_edge(&me, &EdgeRow::new(x, FOLLOWS, y))
        .await
        .unwrap();
    assert_eq!(store.get_edge(&me, x, FOLLOWS).await.unwrap().len(), 1);
}

#[tokio::test]
async fn pair_missing_a_direction_is_left_alone() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let y = profile(&store, json!({"handle": "y"})).await;
    let friends = EdgeRow::new(x, FRIENDS, y);
    assert!(store.create_edge(&Viewer::new(x), &friends).await.unwrap());

    store
        .client()
        .run(
            &Statement::new("UPDATE edges SET status = 1 WHERE from_id = ? AND type = ? AND to_id = ?")
                .bind(y)
                .bind(FRIENDS)
                .bind(x),
        )
        .await
        .unwrap();

    assert!(!store.delete_edge(&Viewer::new(x), &friends).await.unwrap());
    assert!(store
        .get_single_edge(&Viewer::read_all(), x, FRIENDS, y)
        .await
        .unwrap()
        .is_some());
}

// ── Status ───────────────────────────────────────────────────────

#[tokio::test]
async fn soft_delete_drops_index_rows_and_cascades() {
    let (store, _) = open().await;
    let x = profile(
        &store,
        json!({
            "handle": "gone",
            "name": "Soon Gone",
            "bio": "coffee",
            "tags": ["a", "b"],
            "birthday": "1990-05-01T00:00:00Z"
        }),
    )
    .await;
    let y = profile(&store, json!({"handle": "stays"})).await;
    store
        .create_edge(&Viewer::new(x), &EdgeRow::new(x, FOLLOWS, y))
        .await
        .unwrap();
    store
        .insert_defer_index(x, REMIND, Utc::now())
        .await
        .unwrap();
    assert!(index_rows(&store, x).await > 0);

    assert!(store
        .delete_object_and_edges(&Viewer::new(x), x)
        .await
        .unwrap());

    assert_eq!(index_rows(&store, x).await, 0);
    let live_edges = count(
        &store,
        Statement::new(
            "SELECT COUNT(*) AS n FROM edges WHERE (from_id = ? OR to_id = ?) AND status = 0",
        )
        .bind(x)
        .bind(x),
    )
    .await;
    assert_eq!(live_edges, 0);
    assert!(store
        .get_object(&Viewer::read_all(), x)
        .await
        .unwrap()
        .is_none());

    // The row itself is kept.
    let rows = count(
        &store,
        Statement::new("SELECT COUNT(*) AS n FROM objects WHERE id = ?").bind(x),
    )
    .await;
    assert_eq!(rows, 1);

    // The freed handle can be taken.
    profile(&store, json!({"handle": "gone"})).await;
}

#[tokio::test]
async fn restore_rebuilds_indices() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "phoenix", "tags": ["fire"]})).await;
    let writer = Viewer::write_all();

    assert!(store
        .set_object_status(&writer, x, Status::Deleted)
        .await
        .unwrap());
    assert!(!store
        .set_object_status(&writer, x, Status::Deleted)
        .await
        .unwrap());
    assert!(store
        .lookup_index(PROFILE, "tags", &json!("fire"))
        .await
        .unwrap()
        .is_empty());

    assert!(store
        .set_object_status(&writer, x, Status::Visible)
        .await
        .unwrap());
    assert_eq!(
        store.lookup_index(PROFILE, "tags", &json!("fire")).await.unwrap(),
        vec![x]
    );
    assert!(store
        .get_object(&Viewer::read_all(), x)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn restore_refuses_a_taken_unique_value() {
    let (store, _) = open().await;
    let writer = Viewer::write_all();
    let first = profile(&store, json!({"handle": "dup"})).await;
    store
        .set_object_status(&writer, first, Status::Deleted)
        .await
        .unwrap();
    profile(&store, json!({"handle": "dup"})).await;

    let err = store
        .set_object_status(&writer, first, Status::Visible)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn edge_cascade_needs_the_all_writing_viewer() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let err = store
        .set_adjacent_edge_status(&Viewer::new(x), x, Status::Deleted, Status::Visible)
        .await
        .unwrap_err();
    assert!(err.is_denied());

    // The object must carry the new status first.
    let err = store
        .set_adjacent_edge_status(&Viewer::write_all(), x, Status::Deleted, Status::Visible)
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::TrellisError::Validation { .. }));
}

#[tokio::test]
async fn cascade_clears_the_callers_edge_cache() {
    let (store, _) = open().await;
    let x = profile(&store, json!({"handle": "x"})).await;
    let y = profile(&store, json!({"handle": "y"})).await;
    let me = Viewer::new(x);
    assert!(store
        .create_edge(&me, &EdgeRow::new(x, FRIENDS, y))
        .await
        .unwrap());

    assert_eq!(store.get_edge(&me, y, FRIENDS).await.unwrap().len(), 1);
    assert_eq!(store.get_edge(&me, x, FRIENDS).await.unwrap().len(), 1);

    assert!(store.delete_object_and_edges(&me, x).await.unwrap());
    assert!(store.get_edge(&me, y, FRIENDS).await.unwrap().is_empty());
    assert!(store.get_edge(&me, x, FRIENDS).await.unwrap().is_empty());
}

// ── Cache ────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_reads_share_one_query() {
    let (store, _) = open().await;
    let id = profile(&store, json!({"handle": "solo"})).await;
    let viewer = Viewer::new(id);

    let (a, b) = tokio::join!(store.get_object(&viewer, id), store.get_object(&viewer, id));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(viewer.query_count(), 1);

    store.get_object(&viewer, id).await.unwrap();
    assert_eq!(viewer.query_count(), 1);
}

#[tokio::test]
async fn viewers_do_not_share_caches() {
    let (store, _) = open().await;
    let id = profile(&store, json!({"handle": "own"})).await;

    let stranger = Viewer::new(Uuid::now_v7());
    assert!(store.get_object(&stranger, id).await.unwrap().is_none());
    assert!(store
        .get_object(&Viewer::new(id), id)
        .await
        .unwrap()
        .is_some());
}

// ── Index lookups ────────────────────────────────────────────────

#[tokio::test]
async fn geo_lookup_orders_by_distance() {
    let (store, _) = open().await;
    let writer = Viewer::write_all();
    let place = |name: &'static str, lat: f64, lng: f64| {
        let store = &store;
        let writer = &writer;
        async move {
            store
                .create_object(
                    writer,
                    PLACE,
                    data(json!({"name": name, "location": {"lat": lat, "lng": lng}})),
                )
                .await
                .unwrap()
                .unwrap()
        }
    };
    let ferry = place("Ferry Building", 37.7955, -122.3937).await;
    let union = place("Union Square", 37.7880, -122.4075).await;
    let _oakland = place("Lake Merritt", 37.8044, -122.2585).await;

    let near = store
        .lookup_geo_index(GeoPoint::new(37.7946, -122.3999), &[PLACE], 3_000.0)
        .await
        .unwrap();
    assert_eq!(near, vec![ferry, union]);
}

#[tokio::test]
async fn root_linked_types_are_enumerable() {
    let (store, _) = open().await;
    let viewer = Viewer::new(Uuid::now_v7());
    let a = store
        .create_object(&viewer, PLACE, data(json!({"name": "A"})))
        .await
        .unwrap()
        .unwrap();
    let b = store
        .create_object(&viewer, PLACE, data(json!({"name": "B"})))
        .await
        .unwrap()
        .unwrap();

    let listed: Vec<Uuid> = store
        .get_root_objects(&Viewer::logged_out(), PLACE)
        .await
        .unwrap()
        .iter()
        .map(|object| object.id())
        .collect();
    assert_eq!(listed, vec![a, b]);
}

#[tokio::test]
async fn root_edges_must_come_from_the_declared_root() {
    let (store, root) = open().await;
    let a = store
        .create_object(&Viewer::write_all(), PLACE, data(json!({"name": "A"})))
        .await
        .unwrap()
        .unwrap();
    let wrong = Uuid::now_v7();
    let err = store
        .create_edge(
            &Viewer::write_all(),
            &EdgeRow::new(wrong, trellis_core::types::ROOT_TYPE, a),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::TrellisError::Validation { .. }));
    assert!(store
        .get_single_edge(&Viewer::read_all(), root, trellis_core::types::ROOT_TYPE, a)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn time_lookup_covers_row_and_payload_times() {
    let (store, _) = open().await;
    let id = profile(
        &store,
        json!({"handle": "tick", "birthday": "1990-05-01T00:00:00Z"}),
    )
    .await;
    let now = Utc::now();

    let created = store
        .lookup_time_index(
            PROFILE,
            "object.time_created",
            now - Duration::minutes(1),
            Some(now + Duration::minutes(1)),
        )
        .await
        .unwrap();
    assert_eq!(created, vec![id]);

    let birthday = "1990-05-01T00:00:00Z"
        .parse::<chrono::DateTime<Utc>>()
        .unwrap();
    let exact = store
        .lookup_time_index(PROFILE, "birthday", birthday, None)
        .await
        .unwrap();
    assert_eq!(exact, vec![id]);
}

#[tokio::test]
async fn text_lookup_ranks_phrase_matches_first() {
    let (store, _) = open().await;
    let roaster = profile(
        &store,
        json!({"handle": "r", "name": "Mission Coffee Roasters", "bio": "beans"}),
    )
    .await;
    let shop = profile(&store, json!({"handle": "s", "name": "Corner", "bio": "coffee shop"})).await;
    profile(&store, json!({"handle": "t", "name": "Tea House"})).await;

    let hits = store
        .lookup_text_index(PROFILE_SEARCH, "coffee roaster")
        .await
        .unwrap();
    assert_eq!(hits, vec![roaster, shop]);
}

#[tokio::test]
async fn deferred_work_is_due_in_order() {
    let (store, _) = open().await;
    let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
    let now = Utc::now();
    store
        .insert_defer_index(a, REMIND, now - Duration::minutes(5))
        .await
        .unwrap();
    store
        .insert_defer_index(b, REMIND, now - Duration::minutes(10))
        .await
        .unwrap();
    store
        .insert_defer_index(Uuid::now_v7(), REMIND, now + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(
        store.lookup_defer_index(REMIND, now, 10).await.unwrap(),
        vec![b, a]
    );
    store.delete_defer_index(b, REMIND).await.unwrap();
    assert_eq!(
        store.lookup_defer_index(REMIND, now, 10).await.unwrap(),
        vec![a]
    );
}

// ── Compound writes ──────────────────────────────────────────────

#[tokio::test]
async fn object_with_edges_is_owned_by_its_creator() {
    let (store, _) = open().await;
    let author = profile(&store, json!({"handle": "author"})).await;
    let me = Viewer::new(author);

    let note = store
        .create_object_with_edges(
            &me,
            NOTE,
            data(json!({"text": "hello"})),
            &[NewEdge::incoming(author, AUTHORED)],
        )
        .await
        .unwrap();

    let mine = store.get_object(&me, note).await.unwrap().unwrap();
    assert_eq!(mine.creator_id(), Some(author));
    assert!(store
        .get_object(&Viewer::new(Uuid::now_v7()), note)
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.get_edge(&me, author, AUTHORED).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_edge_rolls_back_the_whole_write() {
    let (store, _) = open().await;
    let author = profile(&store, json!({"handle": "author"})).await;
    let me = Viewer::new(author);

    let err = store
        .create_object_with_edges(
            &me,
            NOTE,
            data(json!({"text": "doomed"})),
            &[
                NewEdge::incoming(author, AUTHORED),
                NewEdge::outgoing(AUTHORED, author),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::TrellisError::Validation { .. }));

    let live_notes = count(
        &store,
        Statement::new("SELECT COUNT(*) AS n FROM objects WHERE type = ? AND status = 0")
            .bind(NOTE),
    )
    .await;
    assert_eq!(live_notes, 0);
    assert!(store
        .get_edge(&Viewer::read_all(), author, AUTHORED)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn rollback_never_raises() {
    let (store, _) = open().await;
    store.rollback_object(Uuid::now_v7()).await;
    store
        .rollback_edges(&[EdgeRow::new(Uuid::now_v7(), FOLLOWS, Uuid::now_v7())])
        .await;
}

// ── Identity and roots ───────────────────────────────────────────

#[tokio::test]
async fn identity_links_a_subject_to_its_account() {
    let (store, _) = open().await;
    let subject = Uuid::new_v4();
    let id = store
        .provision_identity(subject, PROFILE, data(json!({"handle": "me"})))
        .await
        .unwrap();

    let viewer = store.viewer_for_subject(subject).await.unwrap().unwrap();
    assert_eq!(viewer.id(), id);
    assert!(store
        .viewer_for_subject(Uuid::new_v4())
        .await
        .unwrap()
        .is_none());

    // The link itself is never visible to ordinary viewers.
    assert!(store
        .get_edge(&viewer, subject, IDENTITY_EDGE)
        .await
        .unwrap()
        .is_empty());

    let again = store
        .provision_identity(subject, PROFILE, data(json!({"handle": "me2"})))
        .await
        .unwrap_err();
    assert!(again.is_conflict());

    store
        .modify_object_data(
            &viewer,
            id,
            data(json!({"identity_subject": "someone-else", "name": "Me"})),
        )
        .await
        .unwrap();
    let account = store
        .get_object(&Viewer::read_all(), id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.field("identity_subject"), Some(&json!(subject.to_string())));
    assert_eq!(account.field("name"), Some(&json!("Me")));
}

#[tokio::test]
async fn generated_roots_are_public() {
    let (store, _) = open().await;
    let root = store.generate_root_id("places").await.unwrap();
    let object = store
        .get_object(&Viewer::logged_out(), root)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(object.field("name"), Some(&json!("places")));

    // Only system writers may create root objects.
    let err = store
        .create_object(
            &Viewer::new(Uuid::now_v7()),
            trellis_core::types::ROOT_TYPE,
            data(json!({"name": "mine"})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::TrellisError::Validation { .. }));
}

// ── Files ────────────────────────────────────────────────────────

#[tokio::test]
async fn file_databases_survive_reconnects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trellis.db");
    let config = StoreConfig {
        database: DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", path.display()),
            max_connections: 4,
            ..DatabaseConfig::default()
        },
        ..StoreConfig::default()
    };
    let root = Uuid::now_v7();

    let id = {
        let store = GraphStore::connect(&config, Arc::new(schema(root)))
            .await
            .unwrap();
        let id = store
            .create_object(&Viewer::write_all(), PROFILE, data(json!({"handle": "disk"})))
            .await
            .unwrap()
            .unwrap();
        store.client().pool().close().await;
        id
    };

    let store = GraphStore::connect(&config, Arc::new(schema(root)))
        .await
        .unwrap();
    let object = store.get_object(&Viewer::new(id), id).await.unwrap().unwrap();
    assert_eq!(object.field("handle"), Some(&json!("disk")));
}
