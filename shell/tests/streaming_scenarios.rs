//! End-to-end scenarios for the streaming shell.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use remsh_core::CommandRegistry;
use remsh_core::EmptyContext;
use remsh_protocol::Message;
use remsh_shell::OutputSink;
use remsh_shell::ScriptedInput;
use remsh_shell::ShellConfig;
use remsh_shell::StreamingShell;
use remsh_transport::MemoryTransport;
use remsh_transport::Transport;

async fn transport() -> Arc<MemoryTransport> {
    let transport = Arc::new(MemoryTransport::new(
        Arc::new(CommandRegistry::new()),
        Arc::new(EmptyContext::new()),
    ));
    transport.connect().await.expect("connect");
    transport
}

#[tokio::test]
async fn commands_are_sent_fire_and_forget() {
    let transport = transport().await;
    let (output, capture) = OutputSink::capture();
    let mut shell = StreamingShell::new(
        Arc::clone(&transport),
        ShellConfig::default(),
        output,
    );

    let mut input = ScriptedInput::new(["deploy start --env=prod", "exit"])
        .with_delay(Duration::from_millis(20));
    let code = shell.run(&mut input).await;
    assert_eq!(code, 0);

    let rendered = capture.contents();
    assert!(rendered.contains("Command sent: deploy"), "{rendered}");
}

#[tokio::test]
async fn pause_resume_and_stats_builtins() {
    let transport = transport().await;
    let (output, capture) = OutputSink::capture();
    let mut shell = StreamingShell::new(
        Arc::clone(&transport),
        ShellConfig::default(),
        output,
    );

    let mut input = ScriptedInput::new(["pause", "resume", "stats", "exit"])
        .with_delay(Duration::from_millis(10));
    shell.run(&mut input).await;

    let rendered = capture.contents();
    assert!(rendered.contains("Streaming paused"), "{rendered}");
    assert!(rendered.contains("Streaming resumed"), "{rendered}");
    assert!(rendered.contains("Messages received:"), "{rendered}");
    assert!(rendered.contains("Paused:            no"), "{rendered}");
}

#[tokio::test]
async fn filtered_messages_are_counted_but_not_rendered() {
    let transport = transport().await;
    let (output, capture) = OutputSink::capture();
    let mut shell = StreamingShell::new(
        Arc::clone(&transport),
        ShellConfig::default(),
        output,
    );
    shell.apply_filter("topic:sensor/temperature");

    // Push one matching and one non-matching message, then give the receive
    // task time to drain them before the scripted input exits.
    let pusher = Arc::clone(&transport);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("topic".to_string(), json!("sensor/temperature"));
        pusher.push_message(Message::data(json!(21.5), "hub", metadata));
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("topic".to_string(), json!("sensor/humidity"));
        pusher.push_message(Message::data(json!(0.4), "hub", metadata));
    });

    let state = shell.stream_state();
    let mut input =
        ScriptedInput::new(["stats", "exit"]).with_delay(Duration::from_millis(150));
    shell.run(&mut input).await;

    assert_eq!(state.message_count(), 3, "subscribe ack + two pushes");
    let rendered = capture.contents();
    assert!(rendered.contains("sensor/temperature"), "{rendered}");
    assert!(!rendered.contains("sensor/humidity"), "{rendered}");
}

#[tokio::test]
async fn filter_builtin_accepts_where_expressions() {
    let transport = transport().await;
    let (output, capture) = OutputSink::capture();
    let mut shell = StreamingShell::new(
        Arc::clone(&transport),
        ShellConfig::default(),
        output,
    );

    let mut input = ScriptedInput::new([
        "filter type = 'data' and source = 'hub'",
        "filter show",
        "filter timestamp between '10:00' and '11:00'",
        "filter clear",
        "exit",
    ])
    .with_delay(Duration::from_millis(10));
    shell.run(&mut input).await;

    let rendered = capture.contents();
    assert!(
        rendered.contains("Filter: type = 'data' and source = 'hub'"),
        "{rendered}"
    );
    // The quoted times contain colons but must reach the WHERE parser, not
    // the glob filter.
    assert!(
        rendered.contains("Filter: timestamp between '10:00' and '11:00'"),
        "{rendered}"
    );
    assert!(!rendered.contains("Error:"), "{rendered}");
    assert!(rendered.contains("Filter cleared"), "{rendered}");
}

#[tokio::test]
async fn builtins_still_work_after_disconnect() {
    let transport = transport().await;
    let (output, capture) = OutputSink::capture();
    let mut shell = StreamingShell::new(
        Arc::clone(&transport),
        ShellConfig::default(),
        output,
    );
    transport.disconnect().await;

    let mut input = ScriptedInput::new(["stats", "remote thing", "exit"])
        .with_delay(Duration::from_millis(10));
    let code = shell.run(&mut input).await;
    assert_eq!(code, 0);

    let rendered = capture.contents();
    assert!(rendered.contains("Messages received:"), "{rendered}");
    // The fire-and-forget send surfaces the transport error inline.
    assert!(rendered.contains("Error: not connected"), "{rendered}");
}
