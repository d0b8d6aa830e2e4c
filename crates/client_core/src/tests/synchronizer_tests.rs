use std::{collections::HashMap, sync::Mutex as StdMutex};

use serde_json::{json, Value};
use shared::{
    domain::{CategoryId, ProviderId, UserId},
    error::ApiError,
    protocol::{Category, CategoryPayload, Provider, Review, User},
};
use tokio::sync::oneshot;

use super::*;
use crate::catalog::{endpoints, Taxonomy};

/// In-memory backend. Each call is recorded as `"METHOD /path"`; a call can be
/// scripted to fail or to wait until released.
#[derive(Default)]
struct FakeBackend {
    lists: StdMutex<HashMap<String, Value>>,
    failures: StdMutex<HashMap<String, SyncError>>,
    holds: StdMutex<HashMap<String, oneshot::Receiver<()>>>,
    calls: StdMutex<Vec<String>>,
}

impl FakeBackend {
    fn with_list(path: &str, value: Value) -> Arc<Self> {
        let backend = Self::default();
        backend.set_list(path, value);
        Arc::new(backend)
    }

    fn set_list(&self, path: &str, value: Value) {
        self.lists
            .lock()
            .expect("lists")
            .insert(path.to_string(), value);
    }

    fn fail(&self, call: &str, status: u16) {
        self.failures.lock().expect("failures").insert(
            call.to_string(),
            SyncError::Status {
                path: call.to_string(),
                source: ApiError::from_response(status, ""),
            },
        );
    }

    fn hold(&self, call: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.holds
            .lock()
            .expect("holds")
            .insert(call.to_string(), rx);
        tx
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    async fn enter(&self, call: String) -> Result<(), SyncError> {
        self.calls.lock().expect("calls").push(call.clone());
        let hold = self.holds.lock().expect("holds").remove(&call);
        if let Some(rx) = hold {
            let _ = rx.await;
        }
        match self.failures.lock().expect("failures").get(&call) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, SyncError> {
        let value = self.lists.lock().expect("lists").get(path).cloned();
        let call = if query.is_empty() {
            format!("GET {path}")
        } else {
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("GET {path}?{}", pairs.join("&"))
        };
        self.enter(call).await?;
        Ok(value.unwrap_or_else(|| json!([])))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        self.enter(format!("POST {path}")).await?;
        Ok(body.clone())
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        self.enter(format!("PUT {path}")).await?;
        Ok(body.clone())
    }

    async fn delete(&self, path: &str) -> Result<(), SyncError> {
        self.enter(format!("DELETE {path}")).await
    }
}

struct Deny;

#[async_trait]
impl ConfirmGate for Deny {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

fn users_json() -> Value {
    json!([
        {"userId": 1, "firstName": "Ann", "lastName": "Lee", "email": "ann@x", "city": "NY"},
        {"userId": 2, "firstName": "Bob", "lastName": "Ray", "email": "bob@x", "city": "LA"},
        {"userId": 3, "firstName": "Cy", "lastName": "Moe", "email": "cy@x", "city": "NY"},
    ])
}

fn user_ids(users: &[User]) -> Vec<i64> {
    users.iter().map(|u| u.user_id.0).collect()
}

fn category_payload(name: &str) -> CategoryPayload {
    CategoryPayload {
        category_name: name.to_string(),
    }
}

#[tokio::test]
async fn starts_idle_with_empty_collection() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());

    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.phase, SyncPhase::Idle);
    assert!(snapshot.collection.is_empty());
    assert!(snapshot.filters.is_empty());
    assert!(snapshot.loaded_at.is_none());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn load_replaces_collection_and_publishes_events() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    let mut events = sync.subscribe();

    let outcome = sync.load().await.expect("load");
    assert!(matches!(outcome, LoadOutcome::Ready { records: 3 }));

    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.phase, SyncPhase::Ready);
    assert_eq!(snapshot.error, None);
    assert_eq!(user_ids(&snapshot.collection), vec![1, 2, 3]);
    assert!(snapshot.loaded_at.is_some());

    assert_eq!(
        events.try_recv().expect("loading event"),
        SyncEvent::Loading {
            resource: "users",
            seq: 1
        }
    );
    assert_eq!(
        events.try_recv().expect("ready event"),
        SyncEvent::Ready {
            resource: "users",
            seq: 1,
            records: 3
        }
    );
}

#[tokio::test]
async fn failed_load_keeps_previous_collection_and_stores_reason() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("first load");

    backend.fail("GET /users", 500);
    let outcome = sync.load().await.expect("second load");
    assert!(matches!(outcome, LoadOutcome::Failed(SyncError::Status { .. })));

    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.phase, SyncPhase::Failed);
    assert!(snapshot.error.is_some());
    assert_eq!(user_ids(&snapshot.collection), vec![1, 2, 3]);
    // Nothing is shown from a collection whose refresh failed.
    assert!(sync.derived_view().await.is_empty());
}

#[tokio::test]
async fn malformed_collection_body_fails_the_load() {
    let backend = FakeBackend::with_list("/users", json!({"unexpected": true}));
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());

    let outcome = sync.load().await.expect("load");
    assert!(matches!(outcome, LoadOutcome::Failed(SyncError::Decode { .. })));
    assert_eq!(sync.phase().await, SyncPhase::Failed);
}

#[tokio::test]
async fn retrying_after_failure_recovers() {
    let backend = FakeBackend::with_list("/users", json!("not a list"));
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("load");
    assert_eq!(sync.phase().await, SyncPhase::Failed);

    backend.set_list("/users", users_json());
    sync.load().await.expect("retry");
    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.phase, SyncPhase::Ready);
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn auxiliary_collections_are_fetched_with_the_collection() {
    let backend = FakeBackend::with_list(
        "/providers",
        json!([{"providerId": 1, "providerName": "P", "email": "p@x", "subcategories": [{"subcategory_id": 50}]}]),
    );
    backend.set_list(
        "/categories",
        json!([{"categoryId": 5, "categoryName": "Home"}]),
    );
    backend.set_list(
        "/subcategories",
        json!([{"subcategory_id": 50, "subcategory_name": "Pipes", "category_id": 5}]),
    );
    let sync = ResourceSynchronizer::<Provider>::new(backend.clone(), endpoints::providers());

    sync.load().await.expect("load");
    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.phase, SyncPhase::Ready);
    assert_eq!(snapshot.auxiliary.categories[0].category_id, CategoryId(5));
    assert_eq!(snapshot.auxiliary.subcategories_of(Some("5")).len(), 1);

    let calls = backend.calls();
    assert!(calls.contains(&"GET /providers".to_string()));
    assert!(calls.contains(&"GET /categories".to_string()));
    assert!(calls.contains(&"GET /subcategories".to_string()));
}

#[tokio::test]
async fn any_failing_auxiliary_fails_the_whole_load() {
    let backend = FakeBackend::with_list(
        "/providers",
        json!([{"providerId": 1, "providerName": "P", "email": "p@x"}]),
    );
    backend.fail("GET /subcategories", 503);
    let sync = ResourceSynchronizer::<Provider>::new(backend.clone(), endpoints::providers());

    let outcome = sync.load().await.expect("load");
    assert!(matches!(outcome, LoadOutcome::Failed(_)));
    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.phase, SyncPhase::Failed);
    assert!(snapshot.collection.is_empty());
    assert_eq!(snapshot.auxiliary, Taxonomy::default());
}

#[tokio::test]
async fn stale_load_response_does_not_overwrite_newer_state() {
    let backend = FakeBackend::with_list(
        "/users",
        json!([{"userId": 9, "firstName": "Old", "lastName": "Data", "email": "old@x"}]),
    );
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    let release = backend.hold("GET /users");

    let (first, second) = tokio::join!(sync.load(), async {
        backend.set_list("/users", users_json());
        let outcome = sync.load().await;
        let _ = release.send(());
        outcome
    });

    assert!(matches!(first.expect("first"), LoadOutcome::Superseded));
    assert!(matches!(second.expect("second"), LoadOutcome::Ready { records: 3 }));
    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.phase, SyncPhase::Ready);
    assert_eq!(user_ids(&snapshot.collection), vec![1, 2, 3]);
}

#[tokio::test]
async fn create_reloads_the_collection() {
    let backend = FakeBackend::with_list("/categories", json!([]));
    let sync = ResourceSynchronizer::<Category>::new(backend.clone(), endpoints::categories());
    sync.load().await.expect("load");

    backend.set_list(
        "/categories",
        json!([{"categoryId": 1, "categoryName": "Home"}]),
    );
    let outcome = sync.create(&category_payload("Home")).await.expect("create");
    assert!(matches!(outcome, LoadOutcome::Ready { records: 1 }));
    assert_eq!(sync.snapshot().await.collection[0].category_name, "Home");
    assert_eq!(
        backend.calls(),
        vec!["GET /categories", "POST /categories", "GET /categories"]
    );
}

#[tokio::test]
async fn update_sends_put_to_item_path_and_reloads() {
    let backend = FakeBackend::with_list(
        "/categories",
        json!([{"categoryId": 4, "categoryName": "Old"}]),
    );
    let sync = ResourceSynchronizer::<Category>::new(backend.clone(), endpoints::categories());
    sync.load().await.expect("load");

    backend.set_list(
        "/categories",
        json!([{"categoryId": 4, "categoryName": "New"}]),
    );
    sync.update(CategoryId(4), &category_payload("New"))
        .await
        .expect("update");
    assert_eq!(sync.snapshot().await.collection[0].category_name, "New");
    assert!(backend.calls().contains(&"PUT /categories/4".to_string()));
}

#[tokio::test]
async fn failed_write_surfaces_error_without_touching_collection() {
    let backend = FakeBackend::with_list(
        "/categories",
        json!([{"categoryId": 4, "categoryName": "Old"}]),
    );
    let sync = ResourceSynchronizer::<Category>::new(backend.clone(), endpoints::categories());
    sync.load().await.expect("load");
    backend.fail("POST /categories", 400);

    let err = sync
        .create(&category_payload("Dup"))
        .await
        .expect_err("create should fail");
    assert!(err.is_remote());
    assert_eq!(sync.snapshot().await.collection.len(), 1);
    assert_eq!(sync.phase().await, SyncPhase::Ready);
    assert_eq!(backend.calls(), vec!["GET /categories", "POST /categories"]);
}

#[tokio::test]
async fn confirmed_remove_splices_locally_without_reload() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("load");
    let mut events = sync.subscribe();

    let outcome = sync
        .remove(UserId(2), &AlwaysConfirm)
        .await
        .expect("remove");
    assert_eq!(outcome, DeleteOutcome::Deleted);

    let snapshot = sync.snapshot().await;
    assert_eq!(user_ids(&snapshot.collection), vec![1, 3]);
    assert_eq!(snapshot.phase, SyncPhase::Ready);
    assert_eq!(backend.calls(), vec!["GET /users", "DELETE /users/2"]);
    assert_eq!(
        events.try_recv().expect("removed event"),
        SyncEvent::Removed {
            resource: "users",
            key: "2".to_string()
        }
    );
}

#[tokio::test]
async fn load_issued_before_a_delete_cannot_restore_the_record() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("load");
    let release = backend.hold("GET /users");

    let (reload, deleted) = tokio::join!(sync.load(), async {
        let pending = sync.request_delete(UserId(2)).await.expect("request");
        let result = sync.confirm_delete(pending).await;
        let _ = release.send(());
        result
    });

    deleted.expect("delete");
    assert!(matches!(reload.expect("reload"), LoadOutcome::Superseded));
    let snapshot = sync.snapshot().await;
    assert_eq!(user_ids(&snapshot.collection), vec![1, 3]);
    assert_eq!(snapshot.phase, SyncPhase::Ready);

    // A load issued after the delete is applied normally.
    backend.set_list(
        "/users",
        json!([{"userId": 1, "firstName": "Ann", "lastName": "Lee", "email": "ann@x"}]),
    );
    sync.load().await.expect("load");
    assert_eq!(user_ids(&sync.snapshot().await.collection), vec![1]);
}

#[tokio::test]
async fn declined_confirmation_sends_nothing() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("load");

    let outcome = sync.remove(UserId(2), &Deny).await.expect("remove");
    assert_eq!(outcome, DeleteOutcome::Cancelled);
    assert_eq!(sync.snapshot().await.collection.len(), 3);
    assert_eq!(backend.calls(), vec!["GET /users"]);
}

#[tokio::test]
async fn failed_delete_leaves_collection_unchanged() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("load");
    backend.fail("DELETE /users/2", 409);

    let pending = sync.request_delete(UserId(2)).await.expect("request");
    assert!(pending.prompt.contains("#2"));
    let err = sync.confirm_delete(pending).await.expect_err("delete fails");
    assert!(matches!(err, SyncError::Status { .. }));
    assert_eq!(user_ids(&sync.snapshot().await.collection), vec![1, 2, 3]);
}

#[tokio::test]
async fn request_delete_rejects_unknown_keys() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("load");

    let err = sync.request_delete(UserId(42)).await.expect_err("unknown");
    assert!(matches!(err, SyncError::UnknownKey { .. }));
}

#[tokio::test]
async fn unsupported_operations_issue_no_request() {
    let backend = FakeBackend::with_list("/subscriptions", json!([]));
    let users = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    let categories = ResourceSynchronizer::<Category>::new(backend.clone(), endpoints::categories());
    let read_only = ResourceSynchronizer::<shared::protocol::Subscription>::new(
        backend.clone(),
        endpoints::subscriptions(),
    );

    let err = read_only
        .request_delete(shared::domain::SubscriptionId(1))
        .await
        .expect_err("no delete");
    assert!(matches!(err, SyncError::Unsupported { operation: "delete", .. }));
    assert!(users.endpoint().create_path().is_none());
    assert!(categories.endpoint().create_path().is_some());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn second_mutation_while_one_is_outstanding_is_rejected() {
    let backend = FakeBackend::with_list("/categories", json!([]));
    let sync = ResourceSynchronizer::<Category>::new(backend.clone(), endpoints::categories());
    let release = backend.hold("POST /categories");

    let payload = category_payload("A");
    let (first, second) = tokio::join!(sync.create(&payload), async {
        let outcome = sync.create(&payload).await;
        let _ = release.send(());
        outcome
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::Busy { .. })));
    let posts = backend
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("POST"))
        .count();
    assert_eq!(posts, 1);

    // The guard is released once the first write settles.
    assert!(sync.create(&category_payload("B")).await.is_ok());
}

#[tokio::test]
async fn detach_discards_pending_responses_and_blocks_further_use() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    let release = backend.hold("GET /users");

    let (pending, ()) = tokio::join!(sync.load(), async {
        sync.detach().await;
        let _ = release.send(());
    });

    assert!(matches!(pending, Err(SyncError::Detached { .. })));
    assert!(sync.snapshot().await.collection.is_empty());
    assert!(matches!(sync.load().await, Err(SyncError::Detached { .. })));
    assert!(matches!(
        sync.set_filter("city", "NY").await,
        Err(SyncError::Detached { .. })
    ));
}

#[tokio::test]
async fn city_filter_scenario() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("load");

    assert_eq!(user_ids(&sync.derived_view().await), vec![1, 2, 3]);
    let effect = sync.set_filter("city", "NY").await.expect("filter");
    assert_eq!(effect, FilterEffect::Local);
    assert_eq!(user_ids(&sync.derived_view().await), vec![1, 3]);
    // Filtering never touches the cached collection.
    assert_eq!(sync.snapshot().await.collection.len(), 3);
}

#[tokio::test]
async fn chained_category_scenario_resets_subcategory() {
    let backend = FakeBackend::with_list("/providers", json!([]));
    backend.set_list(
        "/subcategories",
        json!([
            {"subcategory_id": 50, "subcategory_name": "Pipes", "category_id": 5},
            {"subcategory_id": 51, "subcategory_name": "Wires", "category_id": 5},
            {"subcategory_id": 60, "subcategory_name": "Lawn", "category_id": 6},
        ]),
    );
    let sync = ResourceSynchronizer::<Provider>::new(backend.clone(), endpoints::providers());
    sync.load().await.expect("load");

    sync.set_filter("category", "5").await.expect("category");
    sync.set_filter("subcategory", "51").await.expect("subcategory");
    let snapshot = sync.snapshot().await;
    let domain: Vec<i64> = snapshot
        .auxiliary
        .subcategories_of(snapshot.filters.get("category"))
        .iter()
        .map(|s| s.subcategory_id.0)
        .collect();
    assert_eq!(domain, vec![50, 51]);

    sync.set_filter("category", "").await.expect("category");
    let snapshot = sync.snapshot().await;
    assert_eq!(snapshot.filters.value("subcategory"), "");
    assert!(snapshot
        .auxiliary
        .subcategories_of(snapshot.filters.get("category"))
        .is_empty());
}

#[tokio::test]
async fn server_filter_is_sent_as_query_on_reload() {
    let backend = FakeBackend::with_list(
        "/reviews-by-rating",
        json!([{"reviewId": 1, "providerName": "Acme", "rating": 4}]),
    );
    let sync = ResourceSynchronizer::<Review>::new(backend.clone(), endpoints::reviews());
    sync.load().await.expect("load");

    let effect = sync.apply_filter("rating", "4").await.expect("rating");
    assert_eq!(effect, FilterEffect::Reload);
    assert_eq!(
        backend.calls(),
        vec!["GET /reviews-by-rating", "GET /reviews-by-rating?rating=4"]
    );

    sync.apply_filter("search", "acme").await.expect("search");
    assert_eq!(backend.calls().len(), 2);
    assert_eq!(sync.derived_view().await.len(), 1);
}

#[tokio::test]
async fn provider_scoped_endpoints_are_used_for_listing() {
    let backend = FakeBackend::with_list(
        "/providers/7/gallery",
        json!([{"id": 1, "imageUrl": "http://img/1.png"}, {"id": 2, "imageUrl": "http://img/2.png"}]),
    );
    let sync = ResourceSynchronizer::<shared::protocol::GalleryImage>::new(
        backend.clone(),
        endpoints::provider_gallery(ProviderId(7)),
    );
    sync.load().await.expect("load");
    sync.remove(shared::domain::MediaId(1), &AlwaysConfirm)
        .await
        .expect("remove");

    assert_eq!(sync.snapshot().await.collection.len(), 1);
    assert_eq!(
        backend.calls(),
        vec!["GET /providers/7/gallery", "DELETE /providers/gallery/1"]
    );
}

#[tokio::test]
async fn domains_follow_loaded_collection() {
    let backend = FakeBackend::with_list("/users", users_json());
    let sync = ResourceSynchronizer::<User>::new(backend.clone(), endpoints::users());
    sync.load().await.expect("load");

    let domains = sync.domains().await;
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].filter, "city");
    let cities: Vec<&str> = domains[0].options.iter().map(|(v, _)| v.as_str()).collect();
    assert_eq!(cities, vec!["NY", "LA"]);
    assert_eq!(sync.filter_names(), vec!["search", "city"]);
}
