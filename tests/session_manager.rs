mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use support::{entry, test_config, FakeContext, FakeLauncher, FakePage, LIST_URL};
use watchlist_agent::infrastructure::PageSignal;
use watchlist_agent::services::reply_poster::EDITOR_SELECTOR;
use watchlist_agent::services::scraper::ARTICLE_SELECTOR;
use watchlist_agent::services::{BroadcastSink, EventSink, HumanPacing, ReplyPoster, Scraper};
use watchlist_agent::{AgentEvent, BrowserLauncher, PageDriver, SessionManager};

fn manager(dir: &std::path::Path, launcher: &Arc<FakeLauncher>) -> (Arc<SessionManager>, BroadcastSink) {
    let sink = BroadcastSink::new(64);
    let manager = SessionManager::new(
        test_config(dir),
        launcher.clone() as Arc<dyn BrowserLauncher>,
        Arc::new(sink.clone()) as Arc<dyn EventSink>,
    );
    (Arc::new(manager), sink)
}

#[tokio::test]
async fn test_healthy_session_is_returned_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let page = FakePage::blank();
    launcher.queue_page(Arc::clone(&page));
    let (sessions, _) = manager(dir.path(), &launcher);

    let first = sessions.ensure_session(None).await.unwrap();
    let second = sessions.ensure_session(Some("https://x.com/notifications")).await.unwrap();

    assert_eq!(launcher.launches(), 1);
    assert_eq!(page.count("goto:"), 1);
    assert_eq!(page.actions()[0], format!("goto:{}", LIST_URL));
    assert_eq!(first.origin_url, second.origin_url);
    assert_eq!(second.strategy, "primary");
    assert_eq!(second.pid, Some(4242));
}

#[tokio::test]
async fn test_page_already_on_a_url_is_not_navigated() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let page = FakePage::at("https://x.com/home");
    launcher.queue_page(Arc::clone(&page));
    let (sessions, _) = manager(dir.path(), &launcher);

    sessions.ensure_session(None).await.unwrap();

    assert_eq!(page.count("goto:"), 0);
}

#[tokio::test]
async fn test_extra_tabs_are_closed() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let main = FakePage::blank();
    let extra = FakePage::at("https://example.com");
    launcher.queue(FakeContext::with_pages(vec![Arc::clone(&main), Arc::clone(&extra)]));
    let (sessions, _) = manager(dir.path(), &launcher);

    let handle = sessions.ensure_session(None).await.unwrap();

    assert!(!handle.page.is_closed());
    assert_eq!(extra.count("close"), 1);
    assert_eq!(main.count("close"), 0);
}

#[tokio::test]
async fn test_context_without_pages_opens_one() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    launcher.queue(FakeContext::with_pages(Vec::new()));
    let (sessions, _) = manager(dir.path(), &launcher);

    let handle = sessions.ensure_session(None).await.unwrap();

    assert_eq!(handle.page.url().await.unwrap(), LIST_URL);
}

#[tokio::test]
async fn test_closed_first_page_is_never_handed_out() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let stale = FakePage::at(LIST_URL);
    stale.close_now();
    launcher.queue(FakeContext::with_pages(vec![Arc::clone(&stale)]));
    let (sessions, _) = manager(dir.path(), &launcher);

    let handle = sessions.ensure_session(None).await.unwrap();

    assert!(!handle.page.is_closed());
    assert_eq!(handle.page.url().await.unwrap(), LIST_URL);
    assert_eq!(stale.count("close"), 0);
    assert!(sessions.get_singleton().is_some());
}

#[tokio::test]
async fn test_open_page_is_preferred_over_closed_one() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let stale = FakePage::blank();
    stale.close_now();
    let open = FakePage::at("https://x.com/home");
    launcher.queue(FakeContext::with_pages(vec![Arc::clone(&stale), Arc::clone(&open)]));
    let (sessions, _) = manager(dir.path(), &launcher);

    let handle = sessions.ensure_session(None).await.unwrap();

    assert_eq!(handle.page.url().await.unwrap(), "https://x.com/home");
    assert_eq!(open.count("close"), 0);
    assert_eq!(open.count("goto:"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_trigger_one_reconstruction() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let page = FakePage::blank();
    launcher.queue_page(Arc::clone(&page));
    let (sessions, _) = manager(dir.path(), &launcher);
    sessions.ensure_session(None).await.unwrap();

    page.close_now();
    launcher.set_delay(Duration::from_millis(300));

    let (a, b) = tokio::join!(sessions.ensure_session(None), sessions.ensure_session(None));

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(launcher.launches(), 2);
    assert!(!sessions.state().is_recovering());
    assert_eq!(launcher.contexts()[0].close_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_caller_waits_for_reconstruction_in_progress() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    launcher.set_delay(Duration::from_millis(500));
    let (sessions, _) = manager(dir.path(), &launcher);

    let waiter = async {
        while !sessions.state().is_recovering() {
            tokio::task::yield_now().await;
        }
        let start = Instant::now();
        let handle = sessions.ensure_session(None).await;
        (handle, start.elapsed())
    };

    let (first, (second, waited)) = tokio::join!(sessions.ensure_session(None), waiter);

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(waited >= Duration::from_secs(1));
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_locked_profile_falls_back_to_alternate_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let launcher = FakeLauncher::new();
    launcher.lock_dir(config.user_data_dir.clone());
    let page = FakePage::blank();
    page.show(&[ARTICLE_SELECTOR, EDITOR_SELECTOR]);
    page.set_scrape(json!([entry("alice", "9", "hi")]));
    launcher.queue_page(Arc::clone(&page));
    let (sessions, sink) = manager(dir.path(), &launcher);

    let handle = sessions.ensure_session(None).await.unwrap();

    assert_eq!(handle.strategy, "alternate-profile");
    assert_eq!(handle.profile_dir, config.alternate_user_data_dir());
    assert_eq!(launcher.attempts(), vec!["primary", "alternate-profile"]);

    // 换目录后的会话可以正常抓取和回复
    let items = Scraper::new(config.scrape_timeout)
        .unwrap()
        .scrape_visible(handle.page.as_ref())
        .await;
    assert_eq!(items.len(), 1);
    let poster = ReplyPoster::new(HumanPacing::from_config(&config), Arc::new(sink) as Arc<dyn EventSink>);
    assert!(poster.post_reply(handle.page.as_ref(), &items[0], "hey").await);
    assert_eq!(page.typed(), "hey");
}

#[tokio::test]
async fn test_other_launch_failure_skips_alternate_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let launcher = FakeLauncher::new();
    launcher.fail_strategy("primary");
    let (sessions, _) = manager(dir.path(), &launcher);

    let handle = sessions.ensure_session(None).await.unwrap();

    assert_eq!(handle.strategy, "fallback");
    assert_eq!(handle.profile_dir, config.user_data_dir);
    assert_eq!(launcher.attempts(), vec!["primary", "fallback"]);
}

#[tokio::test]
async fn test_failed_construction_does_not_wedge_manager() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    launcher.fail_all(true);
    let (sessions, _) = manager(dir.path(), &launcher);

    assert!(sessions.ensure_session(None).await.is_err());
    assert!(!sessions.state().is_recovering());
    assert!(sessions.get_singleton().is_none());

    launcher.fail_all(false);
    assert!(sessions.ensure_session(None).await.is_ok());
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_get_singleton_never_constructs() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let page = FakePage::blank();
    launcher.queue_page(Arc::clone(&page));
    let (sessions, _) = manager(dir.path(), &launcher);

    assert!(sessions.get_singleton().is_none());
    assert_eq!(launcher.launches(), 0);

    sessions.ensure_session(None).await.unwrap();
    assert!(sessions.get_singleton().is_some());

    page.close_now();
    assert!(sessions.get_singleton().is_none());
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_closed_context_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let (sessions, _) = manager(dir.path(), &launcher);
    sessions.ensure_session(None).await.unwrap();

    launcher.last_context().unwrap().crash();
    assert!(sessions.get_singleton().is_none());

    sessions.ensure_session(None).await.unwrap();
    assert_eq!(launcher.launches(), 2);
    assert!(!sessions.state().is_context_closed());
    assert!(sessions.get_singleton().is_some());
}

#[tokio::test]
async fn test_legacy_cookies_are_imported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("cookies.json"),
        r#"[{"name": "auth_token", "value": "abc", "domain": ".x.com", "path": "/"}]"#,
    )
    .unwrap();
    let launcher = FakeLauncher::new();
    let page = FakePage::blank();
    launcher.queue_page(Arc::clone(&page));
    let (sessions, _) = manager(dir.path(), &launcher);

    sessions.ensure_session(None).await.unwrap();

    assert_eq!(page.count("cookies:1"), 1);
}

#[tokio::test]
async fn test_broken_cookie_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cookies.json"), "not json").unwrap();
    let launcher = FakeLauncher::new();
    let page = FakePage::blank();
    launcher.queue_page(Arc::clone(&page));
    let (sessions, _) = manager(dir.path(), &launcher);

    assert!(sessions.ensure_session(None).await.is_ok());
    assert_eq!(page.count("cookies:"), 0);
}

#[tokio::test]
async fn test_session_init_and_page_signals_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let page = FakePage::blank();
    launcher.queue_page(Arc::clone(&page));
    let (sessions, sink) = manager(dir.path(), &launcher);
    let mut events = sink.subscribe();

    sessions.ensure_session(None).await.unwrap();
    page.emit(PageSignal::Exception("ReferenceError: foo".to_string()));

    let init = events.recv().await.unwrap();
    assert!(matches!(init, AgentEvent::SessionInit { ref strategy, .. } if strategy == "primary"));
    let exception = events.recv().await.unwrap();
    assert_eq!(
        exception,
        AgentEvent::Exception {
            message: "ReferenceError: foo".to_string()
        }
    );
}

#[tokio::test]
async fn test_shutdown_closes_context() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new();
    let (sessions, _) = manager(dir.path(), &launcher);
    sessions.ensure_session(None).await.unwrap();

    sessions.shutdown().await;

    assert!(sessions.get_singleton().is_none());
    assert_eq!(
        launcher.contexts()[0].close_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}
