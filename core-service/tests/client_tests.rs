//! End-to-end behaviour of the client loop.
//!
//! The loop runs as a spawned task on a paused clock; sleeping in the test
//! lets it reach its deadlines.

mod common;

use bridge_traits::{EtagResponse, LocalDiscoveryStyle, SettingsStore};
use chrono::Utc;
use common::{account, definition, Harness, MockFetcher, ACCOUNT, DAV_URL};
use core_runtime::events::{CoreEvent, FolderEvent, SchedulerEvent};
use core_runtime::settings::MemorySettingsStore;
use core_runtime::SettingsAdapter;
use core_service::{ServiceError, SyncStatus};
use core_sync::SyncError;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn account_folders_are_loaded_from_settings() {
    let settings = MemorySettingsStore::new();
    SettingsAdapter::new(Arc::new(settings.clone()))
        .save_folder(&definition("work", "/home/u/work/"))
        .await
        .unwrap();
    let h = Harness::builder().settings(settings).start();
    h.fs.add_dir("/home/u/work");

    let loaded = h.handle.add_account(account()).await.unwrap();
    assert_eq!(loaded, vec!["work".to_string()]);
    assert!(h.watch_log.lock().unwrap().watched.contains("work"));

    h.run_for(Duration::from_millis(300)).await;
    let request = h.backend.engine("work").last_request().unwrap();
    assert_eq!(request.discovery_style, LocalDiscoveryStyle::FilesystemOnly);
    assert_eq!(request.remote_path, "/work");
    assert_eq!(
        h.handle.folder_status("work").await.unwrap(),
        Some(SyncStatus::SyncPrepare)
    );
}

#[tokio::test(start_paused = true)]
async fn broken_folder_does_not_block_the_account() {
    let settings = MemorySettingsStore::new();
    let adapter = SettingsAdapter::new(Arc::new(settings.clone()));
    adapter
        .save_folder(&definition("work", "/home/u/work/"))
        .await
        .unwrap();
    // Nested inside "work", rejected by the scheduler
    adapter
        .save_folder(&definition("zinner", "/home/u/work/inner/"))
        .await
        .unwrap();
    let h = Harness::builder().settings(settings).start();
    h.fs.add_dir("/home/u/work");
    h.fs.add_dir("/home/u/work/inner");

    let loaded = h.handle.add_account(account()).await.unwrap();

    assert_eq!(loaded, vec!["work".to_string()]);
    assert!(h.handle.folder_status("zinner").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn settings_from_a_newer_client_are_refused() {
    let settings = MemorySettingsStore::new();
    settings.set_i64("Accounts/version", 99).await.unwrap();
    let h = Harness::builder().settings(settings).start();

    let err = h.handle.add_account(account()).await.unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Runtime(core_runtime::Error::IncompatibleVersion { found: 99, .. })
    ));
    assert_eq!(h.stored("Accounts/version").await.as_deref(), Some("99"));
}

#[tokio::test(start_paused = true)]
async fn added_folder_is_persisted_and_announced() {
    let mut h = Harness::start();
    h.handle.add_account(account()).await.unwrap();
    let mut shell = h.connect();

    h.add_folder("work", "/home/u/work/").await;

    assert!(h
        .stored(&format!("Accounts/{ACCOUNT}/Folders/work/localPath"))
        .await
        .is_some());
    assert_eq!(
        h.stored(&format!("Accounts/{ACCOUNT}/Folders/work/targetPath"))
            .await
            .as_deref(),
        Some("/work")
    );
    assert!(shell.drain().contains(&"REGISTER_PATH:/home/u/work".to_string()));
}

#[tokio::test(start_paused = true)]
async fn removed_folder_is_unregistered_and_forgotten() {
    let mut h = Harness::with_folder("work", "/home/u/work/").await;
    let mut shell = h.connect();
    h.run_for(Duration::from_millis(10)).await;
    assert_eq!(shell.drain(), vec!["REGISTER_PATH:/home/u/work"]);

    h.handle.remove_folder("work").await.unwrap();

    assert!(shell
        .drain()
        .contains(&"UNREGISTER_PATH:/home/u/work".to_string()));
    assert!(h.handle.folder_status("work").await.unwrap().is_none());
    assert_eq!(h.watch_log.lock().unwrap().unwatched, vec!["work".to_string()]);
    let keys = h
        .settings
        .list_keys(&format!("Accounts/{ACCOUNT}/Folders/work/"))
        .await
        .unwrap();
    assert!(keys.is_empty());

    assert!(matches!(
        h.handle.remove_folder("work").await,
        Err(ServiceError::Sync(SyncError::FolderNotFound(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn pausing_unregisters_and_persists() {
    let mut h = Harness::with_folder("work", "/home/u/work/").await;
    let mut shell = h.connect();
    h.run_for(Duration::from_millis(10)).await;
    shell.drain();

    assert!(h.handle.set_sync_paused("work", true).await.unwrap());

    assert!(shell
        .drain()
        .contains(&"UNREGISTER_PATH:/home/u/work".to_string()));
    assert_eq!(
        h.stored(&format!("Accounts/{ACCOUNT}/Folders/work/paused"))
            .await
            .as_deref(),
        Some("true")
    );
    assert_eq!(
        h.handle.folder_status("work").await.unwrap(),
        Some(SyncStatus::Paused)
    );
    assert!(!h.handle.set_sync_paused("work", true).await.unwrap());

    assert!(h.handle.set_sync_paused("work", false).await.unwrap());
    assert!(shell.drain().contains(&"REGISTER_PATH:/home/u/work".to_string()));
}

#[tokio::test(start_paused = true)]
async fn watched_change_leads_to_partial_discovery() {
    let h = Harness::with_folder("work", "/home/u/work/").await;
    h.run_for(Duration::from_millis(300)).await;
    h.finish_sync("work");
    h.run_for(Duration::from_secs(1)).await;

    h.fs.add_file("/home/u/work/doc.txt", 42, 1_700_000_000);
    h.path_changed("/home/u/work/doc.txt");
    h.run_for(Duration::from_secs(3)).await;

    let engine = h.backend.engine("work");
    assert_eq!(engine.request_count(), 2);
    let request = engine.last_request().unwrap();
    assert_eq!(request.discovery_style, LocalDiscoveryStyle::DatabaseAndFilesystem);
    assert_eq!(request.local_discovery_paths, vec!["doc.txt".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn unreliable_watcher_is_reported() {
    let h = Harness::with_folder("work", "/home/u/work/").await;
    let mut events = h.handle.subscribe().for_alias("work");

    h.watcher
        .send(bridge_traits::WatcherEvent::Unreliable {
            alias: "work".into(),
            message: "queue overflow".into(),
        })
        .unwrap();

    let event = common::wait_for_event(&mut events, |e| {
        matches!(e, CoreEvent::Folder(FolderEvent::WatcherUnreliable { .. }))
    })
    .await;
    let CoreEvent::Folder(FolderEvent::WatcherUnreliable { message, .. }) = event else {
        unreachable!();
    };
    assert_eq!(message, "queue overflow");
}

#[tokio::test(start_paused = true)]
async fn folder_that_cannot_be_watched_still_syncs() {
    let h = Harness::builder().failing_watch("work").start();
    let mut events = h.handle.subscribe().for_alias("work");
    h.handle.add_account(account()).await.unwrap();

    h.add_folder("work", "/home/u/work/").await;

    let event = common::wait_for_event(&mut events, |e| {
        matches!(e, CoreEvent::Folder(FolderEvent::WatcherUnreliable { .. }))
    })
    .await;
    assert!(matches!(
        event,
        CoreEvent::Folder(FolderEvent::WatcherUnreliable { message, .. })
            if message.contains("inotify limit reached")
    ));
    assert!(!h.watch_log.lock().unwrap().watched.contains("work"));

    h.run_for(Duration::from_millis(300)).await;
    assert_eq!(h.backend.engine("work").request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_etag_change_triggers_a_sync() {
    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch_etag()
        .withf(|request| request.alias == "work" && request.dav_url == DAV_URL)
        .returning(|_| {
            Ok(EtagResponse {
                etag: "\"v2\"".into(),
                fetched_at: Utc::now(),
            })
        });
    let h = Harness::builder().fetcher(fetcher).start();
    let mut events = h.handle.subscribe();
    h.handle.add_account(account()).await.unwrap();
    h.add_folder("work", "/home/u/work/").await;
    h.run_for(Duration::from_millis(300)).await;
    h.finish_sync("work");

    common::wait_for_event(&mut events, |e| {
        matches!(
            e,
            CoreEvent::Scheduler(SchedulerEvent::RemoteChangeDetected { alias, .. }) if alias == "work"
        )
    })
    .await;
    h.run_for(Duration::from_secs(1)).await;

    assert_eq!(h.backend.engine("work").request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn shell_status_request_is_answered() {
    let mut h = Harness::with_folder("work", "/home/u/work/").await;
    h.run_for(Duration::from_millis(300)).await;
    h.finish_sync("work");
    h.run_for(Duration::from_secs(1)).await;

    let mut shell = h.connect();
    h.send_line(&shell, "RETRIEVE_FILE_STATUS:/home/u/work/doc.txt");
    h.send_line(&shell, "RETRIEVE_FILE_STATUS:/tmp/elsewhere.txt");
    h.run_for(Duration::from_millis(10)).await;

    assert_eq!(
        shell.drain(),
        vec![
            "REGISTER_PATH:/home/u/work".to_string(),
            "STATUS:OK:/home/u/work/doc.txt".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn removing_an_account_drops_its_folders() {
    let h = Harness::with_folder("work", "/home/u/work/").await;
    h.add_folder("photos", "/home/u/photos/").await;

    h.handle.remove_account(ACCOUNT).await.unwrap();

    assert!(h.handle.folder_status("work").await.unwrap().is_none());
    assert!(h.handle.folder_status("photos").await.unwrap().is_none());
    assert!(h
        .settings
        .list_keys(&format!("Accounts/{ACCOUNT}/Folders/"))
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        h.handle.remove_account(ACCOUNT).await,
        Err(ServiceError::Sync(SyncError::AccountNotFound(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_running_sync_and_closes_handles() {
    let h = Harness::with_folder("work", "/home/u/work/").await;
    h.run_for(Duration::from_millis(300)).await;
    assert_eq!(h.handle.queue().await.unwrap(), Vec::<String>::new());

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();

    assert!(*h.backend.engine("work").aborts.lock().unwrap() >= 1);
    assert!(matches!(
        h.handle.overall_status().await,
        Err(ServiceError::ChannelClosed)
    ));
}
