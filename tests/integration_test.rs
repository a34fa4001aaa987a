use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tuple_store::engine::{MemoryBuckets, ObjectBuckets, ObjectClient};
use tuple_store::sdk::TcpObjectClient;
use tuple_store::server::Router;
use tuple_store::{
    sdk, Error, FileDirParams, LocalFileStore, MemoryObjectClient, ObjectParams,
    RemoteObjectStore, SafeStrTuple, StoreParams, StoreReader, StoreWriter, TupleStore,
    TypedStoreExt,
};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct User {
    name: String,
    age: i32,
}

fn key(parts: &[&str]) -> SafeStrTuple {
    SafeStrTuple::new(parts).unwrap()
}

/// A store of each backend plus the scratch directories backing it.
fn backends() -> Vec<(Box<dyn TupleStore>, TempDir)> {
    let local_dir = tempdir().unwrap();
    let local: Box<dyn TupleStore> =
        Box::new(LocalFileStore::open(FileDirParams::new(local_dir.path())).unwrap());

    let staging = tempdir().unwrap();
    let client = MemoryObjectClient::new().with_page_size(3);
    let remote: Box<dyn TupleStore> = Box::new(
        RemoteObjectStore::open(
            ObjectParams::new("test-bucket", staging.path()).root_prefix("root"),
            Arc::new(client),
        )
        .unwrap(),
    );

    vec![(local, local_dir), (remote, staging)]
}

fn immutable_backends() -> Vec<(Box<dyn TupleStore>, TempDir)> {
    let local_dir = tempdir().unwrap();
    let local: Box<dyn TupleStore> = Box::new(
        LocalFileStore::open(FileDirParams::new(local_dir.path()).immutable_items(true)).unwrap(),
    );

    let staging = tempdir().unwrap();
    let remote: Box<dyn TupleStore> = Box::new(
        RemoteObjectStore::open(
            ObjectParams::new("test-bucket", staging.path()).immutable_items(true),
            Arc::new(MemoryObjectClient::new()),
        )
        .unwrap(),
    );

    vec![(local, local_dir), (remote, staging)]
}

async fn spawn_object_server(buckets: Arc<dyn ObjectBuckets>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = Router::new(buckets).serve(listener).await;
    });
    addr.to_string()
}

async fn check_round_trip(store: &dyn TupleStore) {
    let values = [
        json!(null),
        json!(true),
        json!(42),
        json!(-1.5),
        json!("text"),
        json!([1, "two", [3]]),
        json!({"nested": {"list": [1, 2], "flag": false}}),
    ];
    for (i, value) in values.iter().enumerate() {
        let id = format!("v{}", i);
        let k = key(&["round", id.as_str()]);
        store.set(&k, value.clone()).await.unwrap();
        assert_eq!(&store.get(&k).await.unwrap(), value);
    }
    assert_eq!(store.len().await.unwrap(), values.len());
    store.clear().await.unwrap();
    assert!(store.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_round_trip_on_both_backends() {
    for (store, _dir) in backends() {
        check_round_trip(store.as_ref()).await;
    }
}

#[tokio::test]
async fn test_case_variants_are_distinct_entries() {
    for (store, _dir) in backends() {
        store.set(&key(&["aaAA"]), json!(1)).await.unwrap();
        store.set(&key(&["AAaa"]), json!(2)).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.get(&key(&["aaAA"])).await.unwrap(), json!(1));
        assert_eq!(store.get(&key(&["AAaa"])).await.unwrap(), json!(2));

        let keys: HashSet<SafeStrTuple> = store.keys().try_collect().await.unwrap();
        assert!(keys.contains(&key(&["aaAA"])));
        assert!(keys.contains(&key(&["AAaa"])));
    }
}

#[tokio::test]
async fn test_immutability_on_both_backends() {
    for (store, _dir) in immutable_backends() {
        let k = key(&["k"]);
        store.set(&k, json!(1)).await.unwrap();
        assert!(matches!(
            store.set(&k, json!(2)).await,
            Err(Error::ImmutableViolation { .. })
        ));
        assert_eq!(store.get(&k).await.unwrap(), json!(1));
        assert!(matches!(store.delete(&k).await, Err(Error::ImmutableViolation { .. })));
        assert!(matches!(store.clear().await, Err(Error::ImmutableViolation { .. })));
        assert_eq!(store.setdefault(&k, json!(3)).await.unwrap(), json!(1));
        assert!(matches!(
            store.pop(&k, None).await,
            Err(Error::ImmutableViolation { .. })
        ));
        assert_eq!(store.get(&k).await.unwrap(), json!(1));
    }
}

#[tokio::test]
async fn test_subsetting() {
    for (store, _dir) in backends() {
        store.set(&key(&["a", "a_1"]), json!(1)).await.unwrap();
        store.set(&key(&["a", "a_2"]), json!(2)).await.unwrap();
        store.set(&key(&["b", "b_1"]), json!(3)).await.unwrap();

        let a = store.get_subdict(&key(&["a"])).await.unwrap();
        assert_eq!(a.len().await.unwrap(), 2);
        assert_eq!(a.get(&key(&["a_1"])).await.unwrap(), json!(1));
        let b = store.get_subdict(&key(&["b"])).await.unwrap();
        assert_eq!(b.len().await.unwrap(), 1);
        let none = store.get_subdict(&key(&["nonexistent"])).await.unwrap();
        assert_eq!(none.len().await.unwrap(), 0);

        let parts = store.subdicts().await.unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts["a"].len().await.unwrap(), 2);

        // Views share backing with the parent.
        a.set(&key(&["a_3"]), json!(4)).await.unwrap();
        assert_eq!(store.get(&key(&["a", "a_3"])).await.unwrap(), json!(4));
    }
}

#[tokio::test]
async fn test_age_ordering() {
    let names = ["a", "b", "c", "d", "e", "f", "g"];
    for (store, _dir) in backends() {
        for name in names {
            store.set(&key(&[name]), json!(name)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let oldest = store.oldest_keys(Some(3)).await.unwrap();
        assert_eq!(oldest, vec![key(&["a"]), key(&["b"]), key(&["c"])]);
        let newest = store.newest_keys(Some(3)).await.unwrap();
        assert_eq!(newest, vec![key(&["g"]), key(&["f"]), key(&["e"])]);

        let mut all_oldest = store.oldest_keys(None).await.unwrap();
        all_oldest.reverse();
        assert_eq!(store.newest_keys(None).await.unwrap(), all_oldest);
        assert!(store.timestamp(&key(&["a"])).await.unwrap() > 0.0);
    }
}

#[tokio::test]
async fn test_delete_if_exists_counts_existing_keys() {
    for (store, _dir) in backends() {
        let existing = ["k1", "k2", "k3"];
        for name in existing {
            store.set(&key(&[name]), json!(name)).await.unwrap();
        }
        let batch = ["absent1", "k2", "k1", "absent2", "k2", "k3", "k1"];
        let mut deleted = 0;
        for name in batch {
            if store.delete_if_exists(&key(&[name])).await.unwrap() {
                deleted += 1;
            }
        }
        assert_eq!(deleted, existing.len());
        assert!(store.is_empty().await.unwrap());
    }
}

#[tokio::test]
async fn test_pop_removes_and_returns() {
    for (store, _dir) in backends() {
        let k = key(&["a", "b"]);
        store.set(&k, json!({"x": 1})).await.unwrap();

        assert_eq!(store.pop(&k, None).await.unwrap(), json!({"x": 1}));
        assert!(!store.contains(&k).await.unwrap());
        assert_eq!(store.pop(&k, Some(json!("fallback"))).await.unwrap(), json!("fallback"));
        assert!(matches!(
            store.pop(&k, None).await,
            Err(Error::KeyNotFound { .. })
        ));
        assert!(store.is_empty().await.unwrap());
    }
}

#[tokio::test]
async fn test_same_items_across_backends() {
    let mut stores = backends();
    let (remote, _staging) = stores.pop().unwrap();
    let (local, _local_dir) = stores.pop().unwrap();

    let mut expected = HashMap::new();
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        let k = key(&["items", name]);
        local.set(&k, json!(i)).await.unwrap();
        remote.set(&k, json!(i)).await.unwrap();
        expected.insert(k, json!(i));
    }

    assert!(local.same_items(remote.as_ref()).await.unwrap());
    assert!(remote.same_items(local.as_ref()).await.unwrap());
    assert!(local.same_items_as_map(&expected).await.unwrap());
    assert!(remote.same_items_as_map(&expected).await.unwrap());

    // Same keys, one differing value.
    remote.set(&key(&["items", "c"]), json!("changed")).await.unwrap();
    assert!(!local.same_items(remote.as_ref()).await.unwrap());
    assert!(!remote.same_items_as_map(&expected).await.unwrap());

    // Same length, one differing key.
    remote.delete(&key(&["items", "c"])).await.unwrap();
    remote.set(&key(&["items", "z"]), json!(2)).await.unwrap();
    assert!(!local.same_items(remote.as_ref()).await.unwrap());

    remote.delete(&key(&["items", "z"])).await.unwrap();
    assert!(!local.same_items(remote.as_ref()).await.unwrap());
    expected.remove(&key(&["items", "c"]));
    assert!(remote.same_items_as_map(&expected).await.unwrap());
}

#[tokio::test]
async fn test_random_sample() {
    for (store, _dir) in backends() {
        for i in 0..10 {
            let id = i.to_string();
            store.set(&key(&["s", id.as_str()]), json!(i)).await.unwrap();
        }
        let sample = store.random_sample(4).await.unwrap();
        assert_eq!(sample.len(), 4);
        assert_eq!(sample.iter().collect::<HashSet<_>>().len(), 4);
        assert_eq!(store.random_sample(100).await.unwrap().len(), 10);
        assert!(store.random_sample(0).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_typed_helpers() {
    for (store, _dir) in backends() {
        let user = User {
            name: "Alice".to_string(),
            age: 30,
        };
        store.set_as(&key(&["users", "alice"]), &user).await.unwrap();
        let got: User = store.get_as(&key(&["users", "alice"])).await.unwrap();
        assert_eq!(got, user);
    }
}

#[tokio::test]
async fn test_concurrent_writers_leave_one_value() {
    let dir = tempdir().unwrap();
    let store = Arc::new(LocalFileStore::open(FileDirParams::new(dir.path())).unwrap());
    let k = key(&["contended"]);

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let k = k.clone();
        handles.push(tokio::spawn(async move { store.set(&k, json!(i)).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let value = store.get(&k).await.unwrap().as_i64().unwrap();
    assert!((0..16).contains(&value));
    assert_eq!(store.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_local_params_rebuild_store() {
    let dir = tempdir().unwrap();
    let store = LocalFileStore::open(FileDirParams::new(dir.path()).file_type("mpk")).unwrap();
    store.set(&key(&["x"]), json!({"a": 1})).await.unwrap();

    let json = store.params().to_json().unwrap();
    let params: StoreParams = serde_json::from_str(&json).unwrap();
    let rebuilt = sdk::open(params).await.unwrap();
    assert_eq!(rebuilt.get(&key(&["x"])).await.unwrap(), json!({"a": 1}));
    assert_eq!(rebuilt.params(), store.params());
}

#[tokio::test]
async fn test_remote_store_over_tcp() {
    let buckets = Arc::new(MemoryBuckets::with_page_size(2));
    let addr = spawn_object_server(buckets.clone()).await;
    let staging = tempdir().unwrap();

    let params = ObjectParams::new("shared", staging.path())
        .endpoint(addr.clone())
        .root_prefix("app");
    let store = sdk::open(StoreParams::Object(params)).await.unwrap();

    check_round_trip(store.as_ref()).await;

    store.set(&key(&["p", "q"]), json!("over the wire")).await.unwrap();
    store.set(&key(&["p", "r"]), json!("")).await.unwrap();
    assert_eq!(store.len().await.unwrap(), 2);
    assert_eq!(store.get(&key(&["p", "q"])).await.unwrap(), json!("over the wire"));
    assert!(matches!(
        store.get(&key(&["missing"])).await,
        Err(Error::KeyNotFound { .. })
    ));

    // The server-side bucket holds the objects.
    let bucket = buckets.bucket("shared").unwrap();
    let page = bucket.list_objects("app/", None).await.unwrap();
    assert_eq!(page.objects.len(), 2);

    // Reported parameters reconnect to the same server.
    let again = sdk::open(store.params()).await.unwrap();
    assert_eq!(again.get(&key(&["p", "q"])).await.unwrap(), json!("over the wire"));

    store.delete(&key(&["p", "q"])).await.unwrap();
    assert!(!again.contains(&key(&["p", "q"])).await.unwrap());
}

#[tokio::test]
async fn test_tcp_client_reports_missing_objects() {
    let addr = spawn_object_server(Arc::new(MemoryBuckets::new())).await;
    let client = TcpObjectClient::connect(&addr, "b1").await.unwrap();
    client.ping().await.unwrap();

    assert!(client.head("a/k.json").await.unwrap().is_none());
    assert!(matches!(
        client.get_object("a/k.json").await,
        Err(Error::ObjectNotFound(name)) if name == "a/k.json"
    ));
    client.put_object("a/k.json", Vec::new()).await.unwrap();
    assert!(client.get_object("a/k.json").await.unwrap().is_empty());
    client.delete_object("a/k.json").await.unwrap();
    assert!(client.list_objects("", None).await.unwrap().objects.is_empty());
}

#[tokio::test]
async fn test_object_protocol() {
    let addr = spawn_object_server(Arc::new(MemoryBuckets::new())).await;

    let stream = TcpStream::connect(&addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut response = String::new();

    writer.write_all(b"PING\n").await.unwrap();
    reader.read_line(&mut response).await.unwrap();
    assert_eq!(response.trim(), "PONG");

    writer.write_all(b"PUT b1 a/k.json 7b7d\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert_eq!(response.trim(), "OK");

    writer.write_all(b"GET b1 a/k.json\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert_eq!(response.trim(), "OK 7b7d");

    writer.write_all(b"HEAD b1 a/k.json\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert!(response.trim().starts_with("OK {"));
    assert!(response.contains(r#""size":2"#));

    writer
        .write_all(b"LIST b1 {\"prefix\":\"a/\",\"continuation\":null}\n")
        .await
        .unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert!(response.contains("a/k.json"));

    writer.write_all(b"GET b1 a/missing.json\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert_eq!(response.trim(), "ERR NOT_FOUND a/missing.json");

    writer.write_all(b"PUT b1 ../escape 00\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert!(response.starts_with("ERR"));

    writer.write_all(b"FROB\n").await.unwrap();
    response.clear();
    reader.read_line(&mut response).await.unwrap();
    assert_eq!(response.trim(), "ERR unknown command");

    writer.write_all(b"QUIT\n").await.unwrap();
    response.clear();
    assert_eq!(reader.read_line(&mut response).await.unwrap(), 0);
}

#[tokio::test]
async fn test_open_object_store_without_endpoint_fails() {
    if std::env::var("TUPLE_STORE_ADDR").is_ok() {
        return;
    }
    let staging = tempdir().unwrap();
    let result = sdk::open(StoreParams::Object(ObjectParams::new("b", staging.path()))).await;
    assert!(matches!(result, Err(Error::Configuration(_))));
}
