use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use simple_logger::SimpleLogger;
use transtore::{
    ErrorCode, LockMode, ManagerConfig, PropRequest, PropUpdate, StoreConfig, StoreRegistry, Sweeper, TransientStore,
};

#[tokio::main]
async fn main() {
    // enable logs for example purposes
    SimpleLogger::new().init().unwrap();

    // a store of keys with 3 independently-lockable properties each, a
    // 5 second entry timeout and a 1 second lock timeout
    let store = Arc::new(TransientStore::new(3, StoreConfig::new(5, 1).unwrap()).with_label("demo"));

    let registry = Arc::new(StoreRegistry::new());
    registry.add("demo", store.clone()).await.unwrap();

    // spawn the sweeper; don't forget this, or nothing ever expires and
    // contended requests never get replayed
    let sweeper = Arc::new(Sweeper::new(registry.clone(), ManagerConfig::default()));
    tokio::spawn(sweeper.run());

    let key = Bytes::from_static(b"user:42");

    // acquire an update lock on property 0, read its (absent) value
    let got = store
        .get(key.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, false)
        .await;
    assert_eq!(got.status, transtore::Status::Ok);
    let lock_id = got.values[0].lock_id;

    // write under that lock id, which also opens it back up
    let put = store
        .put(key.clone(), vec![PropUpdate::new(0, lock_id, Some(Bytes::from_static(b"hello")))])
        .await;
    assert_eq!(put.status, transtore::Status::Ok);

    // a second caller reading the same property sees the value we wrote
    let got = store.get(key.clone(), vec![PropRequest::new(0, LockMode::Read)], 0, false).await;
    println!("property 0 = {:?}", got.values[0].value);

    // a contended update waits up to 2 seconds before giving up
    let _held = store
        .get(key.clone(), vec![PropRequest::new(0, LockMode::Update)], 0, false)
        .await;
    let contended = store
        .get(key.clone(), vec![PropRequest::new(0, LockMode::Update)], 2, false)
        .await;
    println!("contended caller resolved with status: {:?}", contended.status);
    assert!(matches!(
        contended.status,
        transtore::Status::Ok | transtore::Status::LockWaitTimeOut
    ));

    // let the entry expire on its own
    tokio::time::sleep(Duration::from_secs(6)).await;
    let (present, _) = store.exists(b"user:42").await;
    assert!(!present);

    let _ = ErrorCode::General; // taxonomy is re-exported for callers building on this crate
}
