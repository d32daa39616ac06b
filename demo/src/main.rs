use serde_json::json;
use ssebus::{
    BusConfig, ConnectOptions, Event, EventBus, EventStream, JsonConverter, PayloadConverter,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// 模拟传输层：把收到的消息按 SSE 帧打印出来，直到连接关闭
fn spawn_writer(mut stream: EventStream) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let client_id = stream.client_id().to_string();
        let mut count = 0;
        while let Some(message) = stream.recv().await {
            count += 1;
            print!("[{client_id}]\n{}", message.to_sse_frame());
        }
        count
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = BusConfig::builder()
        .max_send_attempts(5)
        .retry_delay(Duration::from_millis(200))
        .build();
    let bus = EventBus::builder()
        .config(config)
        .converters(vec![Arc::new(JsonConverter) as Arc<dyn PayloadConverter>])
        .build()?;
    let handle = bus.start()?;

    let alice = Ulid::new().to_string();
    let bob = Ulid::new().to_string();

    let short = ConnectOptions::builder()
        .events(vec!["news".into(), "stats".into()])
        .timeout(Duration::from_secs(1))
        .build();
    let writers = vec![
        spawn_writer(bus.create_connection(&alice, short)),
        spawn_writer(bus.create_connection(&bob, ConnectOptions::events(["news"]))),
    ];
    bus.subscribe_default(&bob);

    let sent = bus.publish(Event::of("news", "hello\nworld")).await?;
    info!(sent, "published news");

    let sent = bus
        .publish(Event::of("stats", json!({ "clients": bus.client_count() })))
        .await?;
    info!(sent, "published stats");

    let sent = bus
        .publish(
            Event::builder()
                .payload("only for bob")
                .id(Ulid::new().to_string())
                .retry(Duration::from_secs(3))
                .client_ids(vec![bob.clone()])
                .build(),
        )
        .await?;
    info!(sent, "published targeted message");

    // alice 的连接空闲超时后自行关闭，bob 由我们主动注销
    tokio::time::sleep(Duration::from_millis(1500)).await;
    bus.unregister_client(&bob);

    handle.shutdown();
    handle.join().await;

    for writer in writers {
        let count = writer.await?;
        info!(count, "writer finished");
    }
    Ok(())
}
