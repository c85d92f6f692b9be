mod support;

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::json;
use stowage::application::error::HydrateError;
use stowage::application::persist::{HydrateOutcome, PersistEngine, PersistOptions, PersistPhase};
use stowage::domain::container::StateContainer;
use stowage::infra::crypto::{self, CryptoError};
use stowage::infra::storage::{
    Cookie, CookieJar, Environment, StorageAdapter, StorageBackends, StorageKind, WebStorage,
};
use tokio::time::Instant;

use support::{RecordingStorage, empty_store, parse, store};

const SECRET: &str = "s3cret";

#[tokio::test(start_paused = true)]
async fn quick_mutations_collapse_into_one_sealed_write_at_the_window_edge() {
    let storage = RecordingStorage::empty();
    let engine = PersistEngine::builder().secret(SECRET).build();
    let form = empty_store("form");

    let start = Instant::now();
    let mut handle = engine
        .attach(
            Arc::clone(&form),
            PersistOptions::new()
                .custom_storage(storage.clone())
                .paths(["a", "b"])
                .throttle_ms(200)
                .encrypt(true),
        )
        .expect("attach");

    form.set("a", json!(1));
    tokio::time::advance(Duration::from_millis(25)).await;
    form.set("b", json!(2));
    tokio::time::advance(Duration::from_millis(25)).await;
    form.set("c", json!(3));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(storage.writes().is_empty(), "nothing lands inside the window");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let writes = storage.writes();
    assert_eq!(writes.len(), 1);
    let (at, payload) = &writes[0];
    assert_eq!(*at, start + Duration::from_millis(200));

    let opened = crypto::decrypt(payload, SECRET).expect("sealed with the engine secret");
    assert_eq!(parse(&opened), json!({"a": 1, "b": 2}));
    assert!(matches!(
        crypto::decrypt(payload, "not-the-secret"),
        Err(CryptoError::Authentication)
    ));

    handle.dispose();
    handle.closed().await;
    assert_eq!(storage.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disposing_mid_window_still_lands_the_last_snapshot() {
    let storage = RecordingStorage::empty();
    let engine = PersistEngine::builder().build();
    let cart = empty_store("cart");

    let start = Instant::now();
    let mut handle = engine
        .attach(
            Arc::clone(&cart),
            PersistOptions::new()
                .custom_storage(storage.clone())
                .throttle_ms(200),
        )
        .expect("attach");

    cart.set("items", json!([1]));
    tokio::time::advance(Duration::from_millis(50)).await;
    cart.set("items", json!([1, 2]));
    handle.dispose();
    handle.closed().await;

    let writes = storage.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, start + Duration::from_millis(200));
    assert_eq!(parse(&writes[0].1), json!({"items": [1, 2]}));
    assert_eq!(cart.listener_count(), 0);
    assert_eq!(handle.phase(), PersistPhase::Disposed);
}

#[tokio::test(start_paused = true)]
async fn first_mutation_after_an_idle_window_writes_immediately() {
    let storage = RecordingStorage::empty();
    let engine = PersistEngine::builder().build();
    let cart = empty_store("cart");

    let start = Instant::now();
    let mut handle = engine
        .attach(
            Arc::clone(&cart),
            PersistOptions::new()
                .custom_storage(storage.clone())
                .throttle_ms(200),
        )
        .expect("attach");
    handle.hydrated().await.expect("hydrated");

    tokio::time::sleep_until(start + Duration::from_millis(300)).await;
    cart.set("items", json!([1]));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let writes = storage.writes();
    assert_eq!(writes.len(), 1, "leading edge fires without waiting");
    assert_eq!(writes[0].0, start + Duration::from_millis(300));
    assert_eq!(parse(&writes[0].1), json!({"items": [1]}));

    cart.set("items", json!([1, 2]));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let writes = storage.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].0, start + Duration::from_millis(500));
    assert_eq!(parse(&writes[1].1), json!({"items": [1, 2]}));

    handle.dispose();
    handle.closed().await;
}

#[tokio::test]
async fn missing_value_keeps_the_defaults() {
    let storage = RecordingStorage::empty();
    let engine = PersistEngine::builder().build();
    let prefs = store("prefs", json!({"theme": "light"}));

    let handle = engine
        .attach(
            Arc::clone(&prefs),
            PersistOptions::new().custom_storage(storage.clone()),
        )
        .expect("attach");

    let outcome = handle.hydrated().await.expect("hydrated");
    assert!(matches!(*outcome, HydrateOutcome::Missing));
    assert_eq!(prefs.snapshot(), json!({"theme": "light"}).as_object().cloned().expect("object"));
}

#[tokio::test]
async fn empty_stored_value_reads_as_missing() {
    let storage = RecordingStorage::seeded("");
    let engine = PersistEngine::builder().build();
    let prefs = store("prefs", json!({"theme": "light"}));

    let handle = engine
        .attach(prefs, PersistOptions::new().custom_storage(storage))
        .expect("attach");
    let outcome = handle.hydrated().await.expect("hydrated");
    assert_eq!(outcome.label(), "missing");
}

#[tokio::test]
async fn restored_fields_overwrite_only_what_was_stored() {
    let storage = RecordingStorage::seeded(r#"{"a":9,"extra":true}"#);
    let engine = PersistEngine::builder().build();
    let form = store("form", json!({"a": 1, "b": 2}));

    let handle = engine
        .attach(
            Arc::clone(&form),
            PersistOptions::new().custom_storage(storage.clone()),
        )
        .expect("attach");

    let outcome = handle.hydrated().await.expect("hydrated");
    match &*outcome {
        HydrateOutcome::Restored { fields } => {
            assert_eq!(fields, &vec!["a".to_string(), "extra".to_string()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(form.get("a"), Some(json!(9)));
    assert_eq!(form.get("b"), Some(json!(2)));
    assert_eq!(form.get("extra"), Some(json!(true)));
}

#[tokio::test]
async fn malformed_and_non_object_values_are_ignored() {
    let engine = PersistEngine::builder().build();

    for (seed, label) in [("{", "failed"), ("[1,2]", "failed"), ("42", "failed")] {
        let form = store("form", json!({"a": 1}));
        let handle = engine
            .attach(
                Arc::clone(&form),
                PersistOptions::new().custom_storage(RecordingStorage::seeded(seed)),
            )
            .expect("attach");

        let outcome = handle.hydrated().await.expect("hydrated");
        assert_eq!(outcome.label(), label, "seed {seed}");
        assert_eq!(form.get("a"), Some(json!(1)), "seed {seed}");
    }

    let form = empty_store("form");
    let handle = engine
        .attach(
            form,
            PersistOptions::new().custom_storage(RecordingStorage::seeded("[1,2]")),
        )
        .expect("attach");
    let outcome = handle.hydrated().await.expect("hydrated");
    assert!(matches!(
        outcome.error(),
        Some(HydrateError::NotAnObject { found: "array" })
    ));
}

#[tokio::test]
async fn sealed_state_survives_a_reattach() {
    let engine = PersistEngine::builder().secret(SECRET).build();
    let options = || PersistOptions::new().storage(StorageKind::Local).encrypt(true);

    let session = store("session", json!({"token": null}));
    let mut handle = engine
        .attach(Arc::clone(&session), options())
        .expect("attach");
    handle.hydrated().await.expect("hydrated");
    session.set("token", json!("opaque-session-token"));
    handle.dispose();
    handle.closed().await;

    let stored = engine
        .backends()
        .local()
        .get_item("pinia:session")
        .await
        .expect("get")
        .expect("value stored");
    assert!(!stored.contains("opaque-session-token"), "stored value is sealed");

    let reopened = store("session", json!({"token": null}));
    let handle = engine
        .attach(Arc::clone(&reopened), options())
        .expect("attach");
    assert!(handle.hydrated().await.expect("hydrated").is_restored());
    assert_eq!(reopened.get("token"), Some(json!("opaque-session-token")));
}

#[tokio::test]
async fn another_secret_or_tampering_is_rejected() {
    let writer = PersistEngine::builder().secret(SECRET).build();
    let backends = writer.backends().clone();

    let vault = empty_store("vault");
    let mut handle = writer
        .attach(
            Arc::clone(&vault),
            PersistOptions::new().encrypt(true),
        )
        .expect("attach");
    vault.set("pin", json!("1234"));
    handle.dispose();
    handle.closed().await;

    let intruder = PersistEngine::builder()
        .secret("guess")
        .backends(backends.clone())
        .build();
    let target = store("vault", json!({"pin": null}));
    let handle = intruder
        .attach(Arc::clone(&target), PersistOptions::new().encrypt(true))
        .expect("attach");
    let outcome = handle.hydrated().await.expect("hydrated");
    assert_eq!(outcome.label(), "rejected");
    assert_eq!(target.get("pin"), Some(json!(null)));
    drop(handle);

    let sealed = backends
        .local()
        .get_item("pinia:vault")
        .await
        .expect("get")
        .expect("value stored");
    let mut raw = STANDARD.decode(&sealed).expect("base64");
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    backends
        .local()
        .set_item("pinia:vault", &STANDARD.encode(raw))
        .await
        .expect("tamper");

    let reader = PersistEngine::builder()
        .secret(SECRET)
        .backends(backends)
        .build();
    let target = store("vault", json!({"pin": null}));
    let handle = reader
        .attach(Arc::clone(&target), PersistOptions::new().encrypt(true))
        .expect("attach");
    let outcome = handle.hydrated().await.expect("hydrated");
    assert!(outcome.error().is_some_and(HydrateError::is_authentication_failure));
    assert_eq!(target.get("pin"), Some(json!(null)));
}

#[tokio::test]
async fn every_builtin_backend_round_trips_a_container() {
    let engine = PersistEngine::builder().build();

    for kind in [StorageKind::Local, StorageKind::Session, StorageKind::Cookie] {
        let counter = store("counter", json!({"count": 0}));
        let mut handle = engine
            .attach(Arc::clone(&counter), PersistOptions::new().storage(kind))
            .expect("attach");
        handle.hydrated().await.expect("hydrated");
        counter.set("count", json!(3));
        handle.dispose();
        handle.closed().await;

        let revived = store("counter", json!({"count": 0}));
        let handle = engine
            .attach(Arc::clone(&revived), PersistOptions::new().storage(kind))
            .expect("attach");
        assert!(
            handle.hydrated().await.expect("hydrated").is_restored(),
            "{kind}"
        );
        assert_eq!(revived.get("count"), Some(json!(3)), "{kind}");
    }

    let changes = engine.backends().cookies().take_changes();
    assert!(changes.iter().any(|line| line.starts_with("pinia:counter=")));
}

#[tokio::test]
async fn non_interactive_contexts_only_read_cookies() {
    let cookies = CookieJar::from_request_header("pinia:locale=%7B%22lang%22%3A%22fa%22%7D");
    let engine = PersistEngine::builder()
        .backends(StorageBackends::new(
            WebStorage::local(1024),
            WebStorage::session(1024),
            cookies,
        ))
        .environment(Environment::non_interactive())
        .build();

    let locale = store("locale", json!({"lang": "en"}));
    let mut handle = engine
        .attach(
            Arc::clone(&locale),
            PersistOptions::new().storage(StorageKind::Cookie),
        )
        .expect("attach");
    assert!(handle.hydrated().await.expect("hydrated").is_restored());
    assert_eq!(locale.get("lang"), Some(json!("fa")));

    locale.set("lang", json!("de"));
    handle.dispose();
    handle.closed().await;
    assert_eq!(
        engine.backends().cookies().get("pinia:locale").as_deref(),
        Some(r#"{"lang":"fa"}"#)
    );

    let prefs = empty_store("prefs");
    let mut handle = engine
        .attach(Arc::clone(&prefs), PersistOptions::new())
        .expect("attach");
    prefs.set("theme", json!("dark"));
    handle.dispose();
    handle.closed().await;
    assert!(engine.backends().local().is_empty());
}

#[tokio::test]
async fn failed_write_leaves_the_container_usable() {
    let engine = PersistEngine::builder()
        .backends(StorageBackends::in_memory(64))
        .build();
    let notes = empty_store("notes");
    let mut handle = engine
        .attach(Arc::clone(&notes), PersistOptions::new())
        .expect("attach");

    notes.set("body", json!("x".repeat(200)));
    assert_eq!(notes.get("body"), Some(json!("x".repeat(200))));
    notes.set("body", json!("ok"));
    handle.dispose();
    handle.closed().await;

    let stored = engine
        .backends()
        .local()
        .get_item("pinia:notes")
        .await
        .expect("get");
    assert_eq!(stored.as_deref(), Some(r#"{"body":"ok"}"#));
}

#[tokio::test]
async fn sealing_without_a_secret_writes_nothing() {
    let storage = RecordingStorage::empty();
    let engine = PersistEngine::builder().build();
    assert!(!engine.has_secret());

    let vault = empty_store("vault");
    let mut handle = engine
        .attach(
            Arc::clone(&vault),
            PersistOptions::new()
                .custom_storage(storage.clone())
                .encrypt(true),
        )
        .expect("attach");
    vault.set("pin", json!("1234"));
    handle.dispose();
    handle.closed().await;

    assert!(storage.writes().is_empty());
    assert_eq!(vault.get("pin"), Some(json!("1234")));
}

#[tokio::test]
async fn dropping_the_handle_detaches_the_listener() {
    let engine = PersistEngine::builder().build();
    let cart = empty_store("cart");
    let handle = engine
        .attach(Arc::clone(&cart), PersistOptions::new())
        .expect("attach");
    assert_eq!(cart.listener_count(), 1);

    drop(handle);
    assert_eq!(cart.listener_count(), 0);
}

#[tokio::test]
async fn selected_paths_limit_what_is_written() {
    let storage = RecordingStorage::empty();
    let engine = PersistEngine::builder().build();
    let profile = store("profile", json!({"name": "Sara", "draft": "..."}));
    let mut handle = engine
        .attach(
            Arc::clone(&profile),
            PersistOptions::new()
                .key("profile-v2")
                .custom_storage(storage.clone())
                .paths(["name"]),
        )
        .expect("attach");
    assert_eq!(handle.key(), "profile-v2");

    profile.set("draft", json!("changed"));
    handle.dispose();
    handle.closed().await;

    let current = storage.current().expect("written");
    assert_eq!(parse(&current), json!({"name": "Sara"}));
}

#[tokio::test]
async fn cookies_seeded_before_attach_hydrate_the_container() {
    let jar = CookieJar::new();
    jar.set(Cookie::new("pinia:theme", r#"{"mode":"dark"}"#))
        .expect("cookie fits");
    let engine = PersistEngine::builder()
        .backends(StorageBackends::new(
            WebStorage::local(1024),
            WebStorage::session(1024),
            jar,
        ))
        .build();

    let theme = store("theme", json!({"mode": "light"}));
    let handle = engine
        .attach(
            Arc::clone(&theme),
            PersistOptions::new().storage(StorageKind::Cookie),
        )
        .expect("attach");
    handle.hydrated().await.expect("hydrated");
    assert_eq!(theme.get("mode"), Some(json!("dark")));
}
