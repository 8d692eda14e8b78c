//! End-to-end message flow over the full stack: router, parser,
//! scheduler, confirmation dialogue, onboarding, and the libSQL store.

use std::sync::Arc;

use sched_assist::calendar::{CalendarCredentials, CalendarService, InMemoryCalendar, TimeRange};
use sched_assist::config::AssistantConfig;
use sched_assist::router::MessageRouter;
use sched_assist::store::{Database, LibSqlBackend};

const USER: &str = "+15551230001";

async fn setup_with(
    config: AssistantConfig,
) -> (MessageRouter, Arc<InMemoryCalendar>, Arc<dyn Database>) {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let calendar = Arc::new(InMemoryCalendar::new());
    let router = MessageRouter::new(
        Arc::clone(&db),
        Arc::clone(&calendar) as Arc<dyn CalendarService>,
        None,
        config,
    );
    (router, calendar, db)
}

async fn setup() -> (MessageRouter, Arc<InMemoryCalendar>, Arc<dyn Database>) {
    let mut config = AssistantConfig::default();
    config.default_timezone = "America/New_York".to_string();
    setup_with(config).await
}

#[tokio::test]
async fn parse_propose_confirm_creates_the_event() {
    let (router, calendar, _db) = setup().await;

    let proposal = router
        .handle_message(USER, "meeting with John tomorrow at 3pm")
        .await;
    assert!(proposal.contains("meeting with John"));
    assert!(proposal.contains("Shall I add it?"));
    // Full default buffers on an empty calendar.
    assert!(proposal.contains("15 min before"));
    assert!(proposal.contains("15 min after"));

    let done = router.handle_message(USER, "yes").await;
    assert!(done.contains("meeting with John"));
    assert!(done.contains("on your calendar"));

    assert_eq!(calendar.count(USER).await, 1);

    let credentials = CalendarCredentials::for_user(USER);
    let range = TimeRange {
        start: chrono::Utc::now(),
        end: chrono::Utc::now() + chrono::Duration::days(3),
    };
    let events = calendar.list_events(&credentials, range).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "meeting with John");
    // 60-minute default duration.
    assert_eq!(
        (events[0].end - events[0].start).num_minutes(),
        60
    );
}

#[tokio::test]
async fn redelivered_confirmation_books_exactly_once() {
    let (router, calendar, _db) = setup().await;

    router
        .handle_message(USER, "meeting with John tomorrow at 3pm")
        .await;
    let first = router.handle_message(USER, "yes").await;
    let replay = router.handle_message(USER, "yes").await;

    assert_eq!(first, replay);
    assert_eq!(calendar.count(USER).await, 1);
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_book_exactly_once() {
    let (router, calendar, _db) = setup().await;
    let router = Arc::new(router);

    router
        .handle_message(USER, "meeting with John tomorrow at 3pm")
        .await;

    // A gateway retry delivering the same "yes" twice, concurrently.
    let a = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.handle_message(USER, "yes").await }
    });
    let b = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.handle_message(USER, "yes").await }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a, b);
    assert_eq!(calendar.count(USER).await, 1);
}

#[tokio::test]
async fn onboarding_walk_ends_in_suggestions_and_follow_up_books() {
    let (router, calendar, _db) = setup().await;

    let hello = router.handle_message(USER, "hey there").await;
    assert!(hello.contains("what should I call you"));

    router.handle_message(USER, "I'm Dana").await;
    router
        .handle_message(USER, "shipping the launch, family time")
        .await;
    router.handle_message(USER, "mornings, usually 9-11am").await;
    router.handle_message(USER, "mid afternoon").await;
    router.handle_message(USER, "craft, honesty").await;
    router.handle_message(USER, "trail runs").await;
    router.handle_message(USER, "school pickup at 3pm").await;
    router
        .handle_message(USER, "nothing before 8am or after 9pm")
        .await;
    router.handle_message(USER, "expense reports").await;

    let wrap = router.handle_message(USER, "sounds good").await;
    assert!(wrap.contains("Dana"));
    assert!(wrap.contains("shipping the launch"));

    // Follow-up: book the first suggestion, then confirm it.
    let proposal = router.handle_message(USER, "the first one").await;
    assert!(proposal.contains("Shall I add it?"));

    let done = router.handle_message(USER, "yes").await;
    assert!(done.contains("on your calendar"));
    assert_eq!(calendar.count(USER).await, 1);
}

#[tokio::test]
async fn post_buffer_trims_against_a_tight_neighbour() {
    let (router, calendar, db) = setup().await;

    // Prime the user and pin the candidate via an explicit proposal.
    let proposal = router
        .handle_message(USER, "review with Sam tomorrow at 3pm")
        .await;
    assert!(proposal.contains("Shall I add it?"));

    // Seed a neighbour starting 10 minutes after the candidate ends,
    // then revise the proposal so it re-buffers against it.
    let pending = db.get_pending_confirmation(USER).await.unwrap().unwrap();
    let end = pending.buffered.candidate.end();
    calendar
        .seed(
            USER,
            vec![sched_assist::calendar::CalendarEvent {
                id: Some("seed-1".into()),
                title: "Standup".into(),
                start: end + chrono::Duration::minutes(10),
                end: end + chrono::Duration::minutes(40),
            }],
        )
        .await;

    let revised = router
        .handle_message(USER, "actually make it tomorrow at 3pm again")
        .await;
    assert!(revised.contains("Standup"));

    let pending = db.get_pending_confirmation(USER).await.unwrap().unwrap();
    assert_eq!(pending.buffered.post_minutes, 10);
    assert_eq!(pending.buffered.pre_minutes, 15);
    assert_eq!(pending.buffered.conflicts.len(), 1);
}

#[tokio::test]
async fn fallback_reply_after_completed_onboarding() {
    // The dedupe window is off here: this walk legitimately answers
    // several different questions with the same word.
    let mut config = AssistantConfig::default();
    config.dedupe_window = std::time::Duration::ZERO;
    let (router, _calendar, _db) = setup_with(config).await;

    router.handle_message(USER, "hi").await;
    router.handle_message(USER, "Dana").await;
    for _ in 0..9 {
        router.handle_message(USER, "skip").await;
    }
    // Clear the suggestion context.
    router.handle_message(USER, "not now").await;

    let reply = router.handle_message(USER, "thanks!").await;
    assert!(reply.contains("Dana"));
    assert!(reply.contains("tomorrow at 3pm"));
}
