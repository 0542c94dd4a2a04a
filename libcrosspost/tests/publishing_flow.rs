//! End-to-end publishing flows through `CrosspostService` with mock adapters

mod common;

use libcrosspost::accounts::{AccountCredentials, AccountProfile};
use libcrosspost::config::Endpoints;
use libcrosspost::error::PlatformError;
use libcrosspost::platforms::mock::MockPlatform;
use libcrosspost::platforms::PlatformRegistry;
use libcrosspost::service::editing::EditPostRequest;
use libcrosspost::service::events::Event;
use libcrosspost::service::posting::CreatePostRequest;
use libcrosspost::service::tasks::{Task, TaskReceiver};
use libcrosspost::service::ServiceSettings;
use libcrosspost::{
    AccountStore, CrosspostService, Database, PlatformKind, PostStatus, TokenCipher,
};
use secrecy::SecretString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn service_at(
    db_path: &Path,
    cipher: TokenCipher,
    registry: PlatformRegistry,
) -> (CrosspostService, TaskReceiver) {
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    let accounts = AccountStore::new(db.clone(), cipher);
    CrosspostService::new(db, accounts, registry, ServiceSettings::default())
}

async fn connect(service: &CrosspostService, platform: PlatformKind) {
    service
        .accounts()
        .upsert_account(
            "acme",
            platform,
            AccountCredentials {
                access_token: SecretString::from(format!("{}-token", platform)),
                refresh_token: None,
                expires_at: None,
            },
            AccountProfile {
                platform_user_id: Some(format!("{}-user", platform)),
                ..Default::default()
            },
            Some("u-1"),
        )
        .await
        .unwrap();
}

fn request(text: &str, platforms: Vec<PlatformKind>) -> CreatePostRequest {
    CreatePostRequest {
        tenant_id: "acme".to_string(),
        user_id: "u-1".to_string(),
        content: Some(text.to_string()),
        platforms,
        ..Default::default()
    }
}

async fn drain(service: &CrosspostService, receiver: &mut TaskReceiver) -> usize {
    let mut ran = 0;
    while let Some(task) = receiver.try_recv() {
        service.run_task(task).await.unwrap();
        ran += 1;
    }
    ran
}

#[tokio::test]
async fn test_partial_success_skips_unconnected_platform() {
    let temp = TempDir::new().unwrap();
    let linkedin = MockPlatform::succeeding(PlatformKind::Linkedin);
    let facebook = MockPlatform::failing(
        PlatformKind::Facebook,
        PlatformError::Posting("Page not published".to_string()),
    );
    let twitter = MockPlatform::succeeding(PlatformKind::Twitter);
    let registry = PlatformRegistry::new()
        .with(PlatformKind::Linkedin, Arc::new(linkedin.clone()))
        .with(PlatformKind::Facebook, Arc::new(facebook.clone()))
        .with(PlatformKind::Twitter, Arc::new(twitter.clone()));
    let (service, mut receiver) =
        service_at(&temp.path().join("flow.db"), TokenCipher::generate(), registry).await;
    connect(&service, PlatformKind::Linkedin).await;
    connect(&service, PlatformKind::Facebook).await;
    let mut events = service.subscribe();

    let created = service
        .posting()
        .create_and_publish(request(
            "Hiring a backend engineer",
            vec![PlatformKind::Linkedin, PlatformKind::Facebook, PlatformKind::Twitter],
        ))
        .await
        .unwrap();
    assert_eq!(created.status, PostStatus::Publishing);
    assert_eq!(drain(&service, &mut receiver).await, 1);

    let post = service.get_post("acme", &created.id).await.unwrap();
    assert_eq!(post.status, PostStatus::PartialSuccess);
    assert!(post.published_at.is_some());
    assert!(post.error_log.is_none());
    assert_eq!(
        post.platform_responses.native_id(PlatformKind::Linkedin),
        Some("linkedin-mock-1")
    );
    let facebook_entry = post.platform_responses.get(PlatformKind::Facebook).unwrap();
    assert!(!facebook_entry.success);
    assert!(facebook_entry
        .error
        .as_deref()
        .unwrap()
        .contains("Page not published"));
    assert!(post.platform_responses.get(PlatformKind::Twitter).is_none());
    assert_eq!(twitter.publish_count(), 0);

    let mut results = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::PlatformResult { platform, success, .. } = event {
            results.push((platform, success));
        }
    }
    assert_eq!(
        results,
        vec![(PlatformKind::Linkedin, true), (PlatformKind::Facebook, false)]
    );
}

#[tokio::test]
async fn test_every_platform_failing_joins_error_log() {
    let temp = TempDir::new().unwrap();
    let registry = PlatformRegistry::new()
        .with(
            PlatformKind::Linkedin,
            Arc::new(MockPlatform::failing(
                PlatformKind::Linkedin,
                PlatformError::Network("timed out".to_string()),
            )),
        )
        .with(
            PlatformKind::Facebook,
            Arc::new(MockPlatform::failing(
                PlatformKind::Facebook,
                PlatformError::Posting("Page not published".to_string()),
            )),
        );
    let (service, mut receiver) =
        service_at(&temp.path().join("flow.db"), TokenCipher::generate(), registry).await;
    connect(&service, PlatformKind::Linkedin).await;
    connect(&service, PlatformKind::Facebook).await;

    let created = service
        .posting()
        .create_and_publish(request(
            "Open day",
            vec![PlatformKind::Linkedin, PlatformKind::Facebook],
        ))
        .await
        .unwrap();
    drain(&service, &mut receiver).await;

    let post = service.get_post("acme", &created.id).await.unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    assert!(post.published_at.is_none());
    let log = post.error_log.unwrap();
    let parts: Vec<&str> = log.split("; ").collect();
    assert_eq!(parts.len(), 2);
    assert!(parts[0].starts_with("linkedin: ") && parts[0].contains("timed out"));
    assert!(parts[1].starts_with("facebook: ") && parts[1].contains("Page not published"));
}

#[tokio::test]
async fn test_publish_edit_delete_lifecycle() {
    let temp = TempDir::new().unwrap();
    let linkedin = MockPlatform::succeeding(PlatformKind::Linkedin);
    let twitter = MockPlatform::succeeding(PlatformKind::Twitter).without_delete();
    let registry = PlatformRegistry::new()
        .with(PlatformKind::Linkedin, Arc::new(linkedin.clone()))
        .with(PlatformKind::Twitter, Arc::new(twitter.clone()));
    let (service, mut receiver) =
        service_at(&temp.path().join("flow.db"), TokenCipher::generate(), registry).await;
    connect(&service, PlatformKind::Linkedin).await;
    connect(&service, PlatformKind::Twitter).await;

    let created = service
        .posting()
        .create_and_publish(request(
            "First draft",
            vec![PlatformKind::Linkedin, PlatformKind::Twitter],
        ))
        .await
        .unwrap();
    drain(&service, &mut receiver).await;
    let published = service.get_post("acme", &created.id).await.unwrap();
    assert_eq!(published.status, PostStatus::Published);

    let edited = service
        .editing()
        .edit_post(
            "acme",
            &created.id,
            EditPostRequest {
                content: Some("Second draft".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.status, PostStatus::Edited);
    assert!(edited.edited_at.is_some());
    assert_eq!(drain(&service, &mut receiver).await, 1);

    let reposted = service.get_post("acme", &created.id).await.unwrap();
    assert_eq!(
        reposted.platform_responses.native_id(PlatformKind::Linkedin),
        Some("linkedin-mock-2")
    );
    // Twitter can't remove the old tweet, so it keeps the first version
    assert_eq!(
        reposted.platform_responses.native_id(PlatformKind::Twitter),
        Some("twitter-mock-1")
    );
    assert_eq!(linkedin.deleted_ids(), vec!["linkedin-mock-1"]);
    assert_eq!(linkedin.published_texts(), vec!["First draft", "Second draft"]);
    assert_eq!(twitter.publish_count(), 1);

    let report = service
        .deletion()
        .delete_post("acme", &created.id)
        .await
        .unwrap();
    assert!(!report.fully_deleted());
    assert_eq!(report.post.status, PostStatus::PartiallyDeleted);
    assert_eq!(report.post.platforms, vec![PlatformKind::Twitter]);
    let twitter_result = report
        .results
        .iter()
        .find(|r| r.platform == PlatformKind::Twitter)
        .unwrap();
    assert_eq!(twitter_result.error.as_deref(), Some("unsupported"));
    assert_eq!(linkedin.deleted_ids(), vec!["linkedin-mock-1", "linkedin-mock-2"]);

    // Still listed until every platform copy is gone
    let listed = service.list_posts("acme").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, PostStatus::PartiallyDeleted);
}

#[tokio::test]
async fn test_recover_in_flight_publishes_stranded_post_once() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("flow.db");
    let cipher = TokenCipher::generate();
    let linkedin = MockPlatform::succeeding(PlatformKind::Linkedin);
    let registry =
        PlatformRegistry::new().with(PlatformKind::Linkedin, Arc::new(linkedin.clone()));

    // First process accepts the post and dies before the task runs
    let post_id = {
        let (service, mut receiver) = service_at(&db_path, cipher.clone(), registry.clone()).await;
        connect(&service, PlatformKind::Linkedin).await;
        let created = service
            .posting()
            .create_and_publish(request("Stranded", vec![PlatformKind::Linkedin]))
            .await
            .unwrap();
        assert!(receiver.try_recv().is_some());
        created.id
    };

    let (service, mut receiver) = service_at(&db_path, cipher, registry).await;
    assert_eq!(service.recover_in_flight().await.unwrap(), 1);
    drain(&service, &mut receiver).await;

    let post = service.get_post("acme", &post_id).await.unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(linkedin.publish_count(), 1);
    assert_eq!(service.recover_in_flight().await.unwrap(), 0);
}

#[tokio::test]
async fn test_interrupted_fan_out_skips_delivered_platforms() {
    let temp = TempDir::new().unwrap();
    let linkedin = MockPlatform::succeeding(PlatformKind::Linkedin);
    let facebook = MockPlatform::succeeding(PlatformKind::Facebook);
    let registry = PlatformRegistry::new()
        .with(PlatformKind::Linkedin, Arc::new(linkedin.clone()))
        .with(PlatformKind::Facebook, Arc::new(facebook.clone()));
    let (service, mut receiver) =
        service_at(&temp.path().join("flow.db"), TokenCipher::generate(), registry).await;
    connect(&service, PlatformKind::Linkedin).await;
    connect(&service, PlatformKind::Facebook).await;

    let created = service
        .posting()
        .create_and_publish(request(
            "Half done",
            vec![PlatformKind::Linkedin, PlatformKind::Facebook],
        ))
        .await
        .unwrap();
    let task = receiver.try_recv().unwrap();

    // LinkedIn was delivered before the process stopped
    let mut post = service
        .database()
        .get_post_by_id(&created.id)
        .await
        .unwrap()
        .unwrap();
    post.record_response(
        PlatformKind::Linkedin,
        libcrosspost::types::PlatformResponse::delivered("urn:li:share:1"),
    );
    assert!(service.database().save_post(&mut post).await.unwrap());

    service.run_task(task).await.unwrap();
    // A duplicate task for the same post is a no-op
    service
        .run_task(Task::Publish {
            post_id: created.id.clone(),
        })
        .await
        .unwrap();

    let post = service.get_post("acme", &created.id).await.unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(linkedin.publish_count(), 0);
    assert_eq!(facebook.publish_count(), 1);
    assert_eq!(
        post.platform_responses.native_id(PlatformKind::Linkedin),
        Some("urn:li:share:1")
    );
}

#[tokio::test]
async fn test_scheduled_post_waits_for_the_sweep() {
    let temp = TempDir::new().unwrap();
    let facebook = MockPlatform::succeeding(PlatformKind::Facebook);
    let registry =
        PlatformRegistry::new().with(PlatformKind::Facebook, Arc::new(facebook.clone()));
    let (service, mut receiver) =
        service_at(&temp.path().join("flow.db"), TokenCipher::generate(), registry).await;
    connect(&service, PlatformKind::Facebook).await;

    let mut req = request("Next week", vec![PlatformKind::Facebook]);
    req.scheduled_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
    let created = service.posting().create_and_publish(req).await.unwrap();
    assert_eq!(created.status, PostStatus::Scheduled);
    assert_eq!(drain(&service, &mut receiver).await, 0);

    let scheduler = libcrosspost::Scheduler::new(service.clone());
    let early = scheduler.sweep(chrono::Utc::now()).await.unwrap();
    assert_eq!(early.due, 0);

    let later = scheduler
        .sweep(chrono::Utc::now() + chrono::Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(later.due, 1);
    assert_eq!(later.published, 1);

    let post = service.get_post("acme", &created.id).await.unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(facebook.publish_count(), 1);
}

#[tokio::test]
async fn test_unreachable_graph_fails_post_but_keeps_account_connected() {
    let temp = TempDir::new().unwrap();
    let registry = PlatformRegistry::with_http_adapters(
        reqwest::Client::new(),
        Endpoints::all_at(&common::closed_base()),
        Duration::ZERO,
    );
    let (service, _receiver) =
        service_at(&temp.path().join("flow.db"), TokenCipher::generate(), registry).await;
    connect(&service, PlatformKind::Facebook).await;

    let mut req = request("Quarterly update", vec![PlatformKind::Facebook]);
    req.scheduled_at = Some(chrono::Utc::now() + chrono::Duration::minutes(5));
    let created = service.posting().create_and_publish(req).await.unwrap();

    let report = libcrosspost::Scheduler::new(service.clone())
        .sweep(chrono::Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.expired, 0);

    let post = service.get_post("acme", &created.id).await.unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    let error_log = post.error_log.unwrap();
    assert!(error_log.starts_with("facebook: "), "{error_log}");
    assert!(!error_log.contains("facebook-token"), "{error_log}");

    let accounts = service.accounts().list_accounts("acme").await.unwrap();
    assert!(accounts[0].is_connected);
    assert_eq!(accounts[0].status, libcrosspost::AccountStatus::Connected);
}
