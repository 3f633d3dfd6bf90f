use bugtrail_application::StoreRecordRepository;
use bugtrail_core::session::{BrowserInfo, Issue};
use bugtrail_core::storage::StorageCleanup;
use bugtrail_core::{EngineEvent, EventBus, RecordRepository, Settings};
use bugtrail_infrastructure::{StorageConfig, TierSet, TieredStore};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn repository() -> Arc<StoreRecordRepository> {
    let store = Arc::new(TieredStore::new(TierSet::in_memory(&StorageConfig::default())));
    Arc::new(StoreRecordRepository::new(store, EventBus::new()))
}

async fn set_caps(repo: &StoreRecordRepository, sessions: usize, issues: usize) {
    repo.save_settings(&Settings {
        max_sessions_count: sessions,
        max_issues_per_session: issues,
        ..Settings::default()
    })
    .await
    .unwrap();
}

async fn new_session(repo: &StoreRecordRepository, url: &str) -> String {
    repo.create_session(url, BrowserInfo::new("Firefox"))
        .await
        .unwrap()
        .meta
        .id
}

#[tokio::test]
async fn third_session_evicts_the_first_when_cap_is_two() {
    let repo = repository();
    set_caps(&repo, 2, 50).await;
    let mut events = repo.events().subscribe();

    let s1 = new_session(&repo, "https://one").await;
    repo.add_issue(&s1, Issue::new("on first")).await.unwrap();
    let s2 = new_session(&repo, "https://two").await;
    let s3 = new_session(&repo, "https://three").await;

    let ids: Vec<String> = repo
        .get_sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|meta| meta.id)
        .collect();
    assert_eq!(ids, vec![s2, s3.clone()]);
    assert!(repo.get_session_by_id(&s1).await.unwrap().is_none());
    assert!(repo.get_issues(&s1).await.unwrap_err().is_not_found());

    let cleanups: Vec<EngineEvent> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| matches!(event, EngineEvent::StorageCleanup { .. }))
        .collect();
    assert_eq!(cleanups, vec![EngineEvent::StorageCleanup { count: 1 }]);

    assert_eq!(
        repo.get_current_session().await.unwrap().unwrap().meta.id,
        s3
    );
}

#[tokio::test]
async fn listing_keeps_the_most_recent_sessions() {
    let repo = repository();
    set_caps(&repo, 3, 50).await;

    let mut created = Vec::new();
    for n in 0..7 {
        created.push(new_session(&repo, &format!("https://site/{}", n)).await);
    }

    let ids: Vec<String> = repo
        .get_sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|meta| meta.id)
        .collect();
    assert_eq!(ids, created[4..].to_vec());
}

#[tokio::test]
async fn fifty_first_issue_evicts_the_oldest() {
    let repo = repository();
    set_caps(&repo, 10, 50).await;
    let session = new_session(&repo, "https://shop").await;

    let base = Utc::now() - Duration::hours(1);
    let mut ids = Vec::new();
    for n in 0..51 {
        let issue = Issue::new(format!("issue {}", n)).with_timestamp(base + Duration::seconds(n));
        ids.push(repo.add_issue(&session, issue).await.unwrap().id);
    }

    let issues = repo.get_issues(&session).await.unwrap();
    assert_eq!(issues.len(), 50);
    assert!(issues.iter().all(|issue| issue.id != ids[0]));
    assert_eq!(issues[0].id, ids[1]);
    assert_eq!(issues[49].id, ids[50]);

    let meta = &repo.get_sessions().await.unwrap()[0];
    assert_eq!(meta.issue_count, 50);
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let repo = repository();
    for n in 0..8 {
        new_session(&repo, &format!("https://site/{}", n)).await;
    }
    set_caps(&repo, 5, 50).await;

    assert_eq!(StorageCleanup::cleanup_storage(repo.as_ref()).await.unwrap(), 3);
    assert_eq!(repo.get_sessions().await.unwrap().len(), 5);

    assert_eq!(StorageCleanup::cleanup_storage(repo.as_ref()).await.unwrap(), 0);
    assert_eq!(repo.get_sessions().await.unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_to_one_session_keep_an_exact_count() {
    let repo = repository();
    let session = new_session(&repo, "https://race").await;

    let mut handles = Vec::new();
    for n in 0..20 {
        let repo = repo.clone();
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            repo.add_issue(&session, Issue::new(format!("issue {}", n)))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(repo.get_issues(&session).await.unwrap().len(), 20);
    assert_eq!(repo.get_sessions().await.unwrap()[0].issue_count, 20);
    assert_eq!(
        repo.get_current_session().await.unwrap().unwrap().meta.issue_count,
        20
    );
}
