//! End-to-end behavior of the change consumer over the fake transport

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use sofa::testing::FakeTransport;
use sofa::{ChangeEvent, ConsumerState, Database, FeedOptions, FeedType, Seq, Server};
use tokio::sync::mpsc;

fn database(transport: &Arc<FakeTransport>) -> Result<Database> {
    let server = Server::with_transport("http://couch.test:5984/", transport.clone())?;
    Ok(server.database("inventory"))
}

async fn stopped(consumer: &sofa::ChangeConsumer) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(2), consumer.wait_until_stopped()).await?;
    Ok(())
}

#[tokio::test]
async fn test_longpoll_feeds_chain_from_last_seq() -> Result<()> {
    let transport = Arc::new(FakeTransport::new());
    transport.respond_json("GET", "/inventory", 200, r#"{"db_name":"inventory","update_seq":7}"#);
    let first = transport.respond_stream(
        "/inventory/_changes",
        200,
        &[
            r#"{"results":[{"seq":8,"id":"widget","changes":[{"rev":"2-a"}]},"#,
            r#"{"seq":9,"id":"gadget","changes":[{"rev":"1-b"}],"deleted":true}],"last_seq":9,"pending":0}"#,
        ],
    );
    let second = transport.respond_stream("/inventory/_changes", 200, &[r#"{"results":[],"last_seq":9}"#]);

    let db = database(&transport)?;
    let consumer = db.consumer(FeedOptions::new().with_feed(FeedType::Longpoll));
    let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
    consumer.subscribe_fn(move |change| {
        let _ = tx.send(change.clone());
    });

    consumer.start().await?;
    stopped(&consumer).await?;
    assert_eq!(consumer.last_seq(), Some(Seq::from(9)));

    let widget = rx.recv().await.unwrap();
    let gadget = rx.recv().await.unwrap();
    assert_eq!((widget.id.as_str(), gadget.id.as_str()), ("widget", "gadget"));
    assert!(gadget.deleted);

    // Second poll picks up where the first ended
    consumer.start().await?;
    stopped(&consumer).await?;
    assert!(rx.try_recv().is_err());

    let requests = transport.requests_to("/inventory/_changes");
    assert_eq!(requests[0].query_param("since").as_deref(), Some("7"));
    assert_eq!(requests[1].query_param("since").as_deref(), Some("9"));
    assert_eq!(requests[1].query_param("feed").as_deref(), Some("longpoll"));
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_continuous_feed_with_server_error_line() -> Result<()> {
    let transport = Arc::new(FakeTransport::new());
    let mut feed = transport.open_feed("/inventory/_changes");

    let db = database(&transport)?;
    let consumer = db.consumer(FeedOptions::new().with_since(0).with_include_docs(true));
    let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
    consumer.subscribe_fn(move |change| {
        let _ = tx.send(change.clone());
    });
    let mut states = consumer.watch_state();

    consumer.start().await?;
    feed.send_line(r#"{"seq":1,"id":"widget","changes":[{"rev":"1-a"}],"doc":{"_id":"widget","qty":4}}"#);
    let change = rx.recv().await.unwrap();
    assert_eq!(change.doc.as_ref().and_then(|d| d.get("qty")), Some(&serde_json::json!(4)));

    feed.send_line(r#"{"error":"unauthorized","reason":"session expired"}"#);
    feed.close();
    states.wait_for(|s| *s == ConsumerState::Stopped).await?;

    let error = consumer.last_error().expect("error recorded");
    assert_eq!(error.status(), Some(200));
    assert!(error.to_string().contains("unauthorized"));
    assert_eq!(consumer.last_seq(), Some(Seq::from(1)));
    Ok(())
}
