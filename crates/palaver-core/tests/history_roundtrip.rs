mod common;

use std::sync::Arc;

use common::{CHAT, Script, TIMEOUT, chat_config, config_with, factory};
use palaver_core::history::{HistoryStore, HistoryWriter, JsonHistoryStore};
use palaver_core::{Message, MessageState, SessionController};

#[test]
fn json_store_round_trips_messages() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonHistoryStore::new(dir.path());

    let mut reply = Message::pending();
    reply.text = "four".into();
    reply.state = MessageState::Predicted { total_seconds: 0.8 };
    reply.tokens_per_second = 12.5;
    let messages = vec![
        Message::typed("2 + 2?"),
        reply,
        Message::error("Eval out of memory"),
    ];

    store.save(CHAT, &messages).unwrap();
    assert!(dir.path().join("chat.json").is_file());
    assert!(!dir.path().join("chat.json.tmp").exists());

    let loaded = store.load(CHAT).unwrap();
    assert_eq!(loaded.len(), messages.len());
    for (got, want) in loaded.iter().zip(&messages) {
        assert_eq!(got.sender, want.sender);
        assert_eq!(got.state, want.state);
        assert_eq!(got.text, want.text);
        assert_eq!(got.tokens_per_second, want.tokens_per_second);
    }
}

#[test]
fn missing_history_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonHistoryStore::new(dir.path().join("nope"));
    assert!(store.load("ghost").unwrap().is_empty());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn later_save_replaces_earlier_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonHistoryStore::new(dir.path());

    store.save("a", &[Message::typed("old")]).unwrap();
    store
        .save("a", &[Message::typed("old"), Message::typed("new")])
        .unwrap();
    store.save("b", &[]).unwrap();

    assert_eq!(store.load("a").unwrap().len(), 2);
    assert_eq!(store.list().unwrap(), ["a", "b"]);
}

#[test]
fn session_resumes_from_saved_history() {
    let dir = tempfile::tempdir().unwrap();
    let prompts = common::Prompts::default();

    {
        let mut ctl = SessionController::new(
            CHAT,
            config_with(chat_config()),
            factory(Script::emitting(&[("pong", 0.1)]), Arc::clone(&prompts)),
            HistoryWriter::spawn(JsonHistoryStore::new(dir.path())),
        );
        ctl.send("ping").unwrap();
        assert!(ctl.run_until_idle(TIMEOUT));
        ctl.flush_history();
    }

    let store = JsonHistoryStore::new(dir.path());
    let restored = store.load(CHAT).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[1].text, "pong");

    let ctl = SessionController::new(
        CHAT,
        config_with(chat_config()),
        factory(Script::default(), prompts),
        HistoryWriter::spawn(store),
    )
    .with_messages(restored);
    assert_eq!(ctl.messages()[0].text, "ping");
    assert!(ctl.store().active_index().is_none());
}
