mod common;

use rfm_harvester::Pipeline;
use rfm_harvester::store::IdentifierStore;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer};

use common::{EchoUser, config, data_rows, write_pending};

#[tokio::test]
async fn interrupted_run_resumes_with_exactly_the_remaining_users() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&server, dir.path());
    // One slot makes the request order follow the pending order
    config.max_concurrent = 1;
    config.compact_every = 2;
    let ids: Vec<String> = (1..=10).map(|n| format!("u{n}")).collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    write_pending(&config.pending_path, &ids);

    let cancel = CancellationToken::new();
    // The fifth request is still answered; everything queued behind it stops
    Mock::given(method("GET"))
        .and(path_regex(r"^/users/u\d+$"))
        .respond_with(EchoUser::new().cancel_on_request(5, cancel.clone()))
        .expect(10)
        .mount(&server)
        .await;

    let pipeline = Pipeline::new(config.clone()).unwrap();
    let first = pipeline.run(cancel).await.unwrap();

    assert!(first.interrupted);
    assert_eq!(first.recorded, 5);
    assert_eq!(first.cancelled, 5);
    assert_eq!(first.remaining, 5);

    let recorded = data_rows(&config.output_path);
    let pending = IdentifierStore::open(&config.pending_path, 64).unwrap().load();
    assert_eq!(recorded.len() + pending.len(), 10);
    for id in &pending {
        assert!(!recorded.iter().any(|row| row.starts_with(&format!("{id},"))));
    }

    let second = pipeline.run(CancellationToken::new()).await.unwrap();
    assert!(!second.interrupted);
    assert_eq!(second.dispatched, 5);
    assert_eq!(second.recorded, 5);
    assert_eq!(second.skipped, 0);
    assert_eq!(second.remaining, 0);

    let verified = rfm_harvester::verify(&config.output_path, &config.pending_path).unwrap();
    assert!(verified.is_clean());
    assert_eq!(verified.rows, Some(10));
    assert_eq!(verified.pending, Some(0));
    assert_eq!(server.received_requests().await.unwrap().len(), 10);
}
