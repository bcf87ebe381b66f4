use remcard_partners::store::{existing_ids, parse_records};
use remcard_partners::{
    EMPTY_STORE, Error, MemoryGateway, PartnerAppender, PartnerDraft, PartnerRecord, RetryPolicy,
};
use std::sync::Arc;

fn draft(name: &str) -> PartnerDraft {
    PartnerDraft {
        name: name.to_string(),
        category: "Сантехника".to_string(),
        address: "Краснодар, ул. Кубанская, 5".to_string(),
        description: "Установка и ремонт".to_string(),
        website: Some("https://example.ru".to_string()),
        phones: vec!["79991234567".to_string(), "79997654321".to_string()],
        logo: None,
        extra_label: None,
    }
}

fn appender(gateway: &Arc<MemoryGateway>, retry: RetryPolicy) -> PartnerAppender {
    PartnerAppender::new(gateway.clone(), retry)
}

fn fast_retries(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_backoff_ms: 0,
    }
}

const SEEDED: &str = "export const partnersData = [\n  {\n    id: 1,\n    name: \"A\",\n  },\n  {\n    id: 2,\n    name: \"B\",\n  },\n  {\n    id: 5,\n    name: \"C\",\n  },\n];\n";

#[tokio::test]
async fn allocates_past_the_largest_existing_id() {
    let gateway = Arc::new(MemoryGateway::new(SEEDED));
    let outcome = appender(&gateway, RetryPolicy::default())
        .append(draft("Потолки"))
        .await
        .unwrap();

    assert_eq!(outcome.record.id, 6);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.revision, gateway.revision());
    assert_eq!(
        existing_ids(&gateway.content())
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>(),
        vec![1, 2, 5, 6]
    );
}

#[tokio::test]
async fn sequential_appends_to_an_empty_store() {
    let gateway = Arc::new(MemoryGateway::new(EMPTY_STORE));
    let appender = appender(&gateway, RetryPolicy::default());

    let first = appender.append(draft("Первый")).await.unwrap();
    let second = appender.append(draft("Второй")).await.unwrap();
    assert_eq!(first.record.id, 1);
    assert_eq!(second.record.id, 2);

    let records = parse_records(&gateway.content()).unwrap();
    let partners: Vec<PartnerRecord> = records
        .iter()
        .map(|r| PartnerRecord::try_from(r).unwrap())
        .collect();
    assert_eq!(partners, vec![first.record, second.record]);
    assert!(gateway.content().ends_with("  },\n];\n"));
}

#[tokio::test]
async fn conflict_is_retried_from_a_fresh_snapshot() {
    let gateway = Arc::new(MemoryGateway::new(EMPTY_STORE));
    // Another writer lands id 1 right after our first read.
    let theirs = remcard_partners::store::append_record(EMPTY_STORE, &draft("Чужой").into_record(1))
        .unwrap();
    gateway.push_concurrent_write(theirs);

    let outcome = appender(&gateway, fast_retries(3))
        .append(draft("Наш"))
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.record.id, 2);
    assert_eq!(gateway.reads(), 2);
    assert_eq!(gateway.commits(), 2);

    let names: Vec<String> = parse_records(&gateway.content())
        .unwrap()
        .iter()
        .filter_map(|r| r.text("name").map(str::to_owned))
        .collect();
    assert_eq!(names, vec!["Чужой".to_string(), "Наш".to_string()]);
}

#[tokio::test]
async fn conflict_surfaces_after_the_last_attempt() {
    let gateway = Arc::new(MemoryGateway::new(EMPTY_STORE));
    for n in 1..=3 {
        let content = format!("export const partnersData = [\n  {{ id: {n} }},\n];\n");
        gateway.push_concurrent_write(content);
    }

    let err = appender(&gateway, fast_retries(3))
        .append(draft("Наш"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UpstreamWriteConflict { status: 409, .. }));
    assert_eq!(gateway.commits(), 3);
    // Only the foreign writes landed.
    assert_eq!(
        gateway.content(),
        "export const partnersData = [\n  { id: 3 },\n];\n"
    );
}

#[tokio::test]
async fn single_attempt_policy_does_not_retry() {
    let gateway = Arc::new(MemoryGateway::new(EMPTY_STORE));
    gateway.push_concurrent_write("export const partnersData = [\n  { id: 9 },\n];\n");

    let err = appender(&gateway, RetryPolicy::single_attempt())
        .append(draft("Наш"))
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(gateway.reads(), 1);
    assert_eq!(gateway.commits(), 1);
}

#[tokio::test]
async fn malformed_store_is_not_committed() {
    let broken = "export const partnersData = [\n  { id: 1 },\n]\n";
    let gateway = Arc::new(MemoryGateway::new(broken));

    let err = appender(&gateway, fast_retries(3))
        .append(draft("Наш"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MalformedStore { .. }));
    assert_eq!(gateway.commits(), 0);
    assert_eq!(gateway.reads(), 1);
    assert_eq!(gateway.content(), broken);
}

#[tokio::test]
async fn zero_attempts_is_treated_as_one() {
    let gateway = Arc::new(MemoryGateway::new(EMPTY_STORE));
    let appender = appender(&gateway, fast_retries(0));
    assert_eq!(appender.retry_policy().max_attempts, 1);
    assert_eq!(appender.append(draft("Наш")).await.unwrap().record.id, 1);
}

#[tokio::test]
async fn blank_drafts_never_reach_the_store() {
    let gateway = Arc::new(MemoryGateway::new(SEEDED));
    let mut blank = draft("  ");
    blank.address.clear();

    let err = appender(&gateway, RetryPolicy::default())
        .append(blank)
        .await
        .unwrap_err();

    match err {
        Error::Validation { reason } => assert!(reason.contains("name, address")),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(gateway.calls(), 0);
    assert_eq!(gateway.content(), SEEDED);
}

#[tokio::test]
async fn write_failures_other_than_conflicts_are_not_retried() {
    let gateway = Arc::new(MemoryGateway::new(SEEDED));
    gateway.push_rejected_commit(403);

    let err = appender(&gateway, fast_retries(3))
        .append(draft("Потолки"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UpstreamWrite { status: 403, .. }));
    assert_eq!(gateway.reads(), 1);
    assert_eq!(gateway.commits(), 1);
    assert_eq!(gateway.content(), SEEDED);
}
