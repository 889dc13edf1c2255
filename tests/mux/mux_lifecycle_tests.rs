//! 会话生命周期集成测试
//!
//! 使用假宿主验证状态转换、按键转发、轮询门控和分离/重连。

#[path = "../test_utils/mod.rs"]
mod test_utils;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use console_lib::mux::{
    MuxError, MuxNotification, SessionHost, SessionId, SessionKind, SessionMultiplexer,
    SessionState,
};
use test_utils::{eventually_blocking, test_config, FakeHost};

fn multiplexer() -> (Arc<SessionMultiplexer>, Arc<FakeHost>) {
    let host = Arc::new(FakeHost::default());
    let mux = Arc::new(SessionMultiplexer::with_host(
        test_config(),
        Arc::clone(&host) as Arc<dyn SessionHost>,
    ));
    (mux, host)
}

fn record_transitions(mux: &SessionMultiplexer) -> Arc<Mutex<Vec<(SessionState, SessionState)>>> {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&transitions);
    mux.subscribe(move |notification| {
        if let MuxNotification::SessionStateChanged { from, to, .. } = notification {
            sink.lock().push((*from, *to));
        }
        true
    });
    transitions
}

#[test]
fn test_create_start_type_stop_restart_keeps_identity() {
    let (mux, host) = multiplexer();
    let transitions = record_transitions(&mux);

    let session = mux
        .create_session(
            SessionKind::Shell,
            Some("alpha".to_string()),
            std::env::temp_dir(),
            None,
        )
        .unwrap();
    assert_eq!(session.state, SessionState::Created);
    assert!(!mux.terminal_info(&session.id).unwrap().running);

    mux.start(&session.id).unwrap();
    assert!(mux.is_running(&session.id));
    mux.foreground(&session.id).unwrap();
    assert!(mux.input_mode());

    let key = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
    assert!(mux.handle_key(&key));
    let first = host.process(&session.id).unwrap();
    assert_eq!(first.input_text(), "a");

    mux.stop(&session.id).unwrap();
    assert_eq!(mux.session(&session.id).unwrap().state, SessionState::Stopped);
    assert!(!mux.input_mode());
    assert!(eventually_blocking(|| first.dead.load(Ordering::SeqCst)));

    mux.start(&session.id).unwrap();
    assert_eq!(mux.session(&session.id).unwrap().state, SessionState::Running);
    assert_eq!(mux.list().len(), 1);
    assert_eq!(host.launches.load(Ordering::SeqCst), 2);

    // 每次进入 Running 之前都经过 Starting
    let transitions = transitions.lock().clone();
    assert!(!transitions.contains(&(SessionState::Created, SessionState::Running)));
    assert_eq!(
        transitions,
        vec![
            (SessionState::Created, SessionState::Starting),
            (SessionState::Starting, SessionState::Running),
            (SessionState::Running, SessionState::Stopped),
            (SessionState::Stopped, SessionState::Starting),
            (SessionState::Starting, SessionState::Running),
        ]
    );
    mux.shutdown(false);
}

#[test]
fn test_stop_is_noop_for_inactive_sessions() {
    let (mux, host) = multiplexer();
    let transitions = record_transitions(&mux);

    let created = mux
        .create_session(SessionKind::Shell, None, std::env::temp_dir(), None)
        .unwrap();
    mux.stop(&created.id).unwrap();
    assert_eq!(mux.session(&created.id).unwrap().state, SessionState::Created);

    host.fail.store(true, Ordering::SeqCst);
    let errored = mux
        .create_session(SessionKind::Database, None, std::env::temp_dir(), None)
        .unwrap();
    assert!(mux.start(&errored.id).unwrap_err().is_launch());
    mux.stop(&errored.id).unwrap();
    mux.stop(&errored.id).unwrap();
    assert_eq!(mux.session(&errored.id).unwrap().state, SessionState::Errored);

    assert_eq!(
        transitions.lock().clone(),
        vec![
            (SessionState::Created, SessionState::Starting),
            (SessionState::Starting, SessionState::Errored),
        ]
    );
    assert!(matches!(
        mux.stop(&SessionId::from("missing")),
        Err(MuxError::NotFound(_))
    ));
}

#[test]
fn test_errored_session_can_be_started_again() {
    let (mux, host) = multiplexer();
    host.fail.store(true, Ordering::SeqCst);
    let session = mux
        .create_session(SessionKind::Assistant, None, std::env::temp_dir(), None)
        .unwrap();
    assert!(mux.start(&session.id).is_err());

    host.fail.store(false, Ordering::SeqCst);
    mux.start(&session.id).unwrap();
    assert_eq!(mux.session(&session.id).unwrap().state, SessionState::Running);
}

#[test]
fn test_keys_to_background_or_stopped_sessions_are_dropped() {
    let (mux, host) = multiplexer();
    let session = mux
        .create_session(SessionKind::Shell, None, std::env::temp_dir(), None)
        .unwrap();
    let key = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);

    // 没有前台会话
    mux.start(&session.id).unwrap();
    assert!(!mux.handle_key(&key));

    mux.foreground(&session.id).unwrap();
    assert!(mux.handle_key(&key));
    assert_eq!(host.process(&session.id).unwrap().input_text(), "\r");

    mux.stop(&session.id).unwrap();
    assert!(!mux.handle_key(&key));
    assert!(mux.write_input(&session.id, b"ls").unwrap_err().is_attach());
}

#[test]
fn test_host_exit_stops_polling_and_input_mode() {
    let (mux, host) = multiplexer();
    let exited = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&exited);
    mux.subscribe(move |notification| {
        if let MuxNotification::InputModeExited { session_id } = notification {
            sink.lock().push(session_id.clone());
        }
        true
    });

    let session = mux
        .create_session(SessionKind::Shell, None, std::env::temp_dir(), None)
        .unwrap();
    mux.start(&session.id).unwrap();
    mux.foreground(&session.id).unwrap();
    assert!(mux.is_polling());

    host.process(&session.id)
        .unwrap()
        .dead
        .store(true, Ordering::SeqCst);

    assert!(eventually_blocking(|| !mux.is_polling()));
    assert_eq!(mux.session(&session.id).unwrap().state, SessionState::Stopped);
    assert!(!mux.input_mode());
    assert_eq!(exited.lock().clone(), vec![session.id.clone()]);
}

#[test]
fn test_polling_only_while_foregrounded() {
    let (mux, host) = multiplexer();
    let first = mux
        .create_session(SessionKind::Shell, None, std::env::temp_dir(), None)
        .unwrap();
    let second = mux
        .create_session(SessionKind::Shell, None, std::env::temp_dir(), None)
        .unwrap();
    mux.start(&first.id).unwrap();
    mux.start(&second.id).unwrap();
    assert!(!mux.is_polling());

    *host.process(&first.id).unwrap().lines.lock() = vec!["first".to_string()];
    *host.process(&second.id).unwrap().lines.lock() = vec!["second".to_string()];

    mux.foreground(&first.id).unwrap();
    assert!(eventually_blocking(|| mux.screen(&first.id).unwrap().generation >= 1));
    mux.foreground(&second.id).unwrap();
    assert!(eventually_blocking(|| mux.screen(&second.id).unwrap().generation >= 1));
    assert_eq!(mux.screen(&second.id).unwrap().lines, vec!["second".to_string()]);

    // 前台切走后不再抓取
    *host.process(&first.id).unwrap().lines.lock() = vec!["changed".to_string()];
    thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(mux.screen(&first.id).unwrap().lines, vec!["first".to_string()]);

    mux.background();
    assert!(!mux.is_polling());
}

#[test]
fn test_concurrent_get_or_create_yields_one_terminal() {
    let (mux, _host) = multiplexer();
    let id = SessionId::from("shared");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mux = Arc::clone(&mux);
            let id = id.clone();
            thread::spawn(move || {
                mux.get_or_create(
                    &id,
                    std::env::temp_dir(),
                    console_lib::mux::CommandSpec::new("sh"),
                )
            })
        })
        .collect();
    let infos: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(infos.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(mux.list().len(), 1);
}

#[test]
fn test_detach_keeps_host_sessions_and_restore_reattaches() {
    let (mux, host) = multiplexer();
    let session = mux
        .create_session(SessionKind::Shell, None, std::env::temp_dir(), Some("keep".into()))
        .unwrap();
    let idle = mux
        .create_session(SessionKind::Shell, None, std::env::temp_dir(), None)
        .unwrap();
    mux.start(&session.id).unwrap();

    let records = mux.records();
    mux.shutdown(true);
    let process = host.process(&session.id).unwrap();
    assert!(process.detached.load(Ordering::SeqCst));
    assert!(!process.dead.load(Ordering::SeqCst));

    // 新的多路复用器实例，宿主中只有第一个会话仍然存活
    host.surviving.lock().insert(session.id.clone());
    let restored = SessionMultiplexer::with_host(
        test_config(),
        Arc::clone(&host) as Arc<dyn SessionHost>,
    );
    assert_eq!(restored.restore_records(records), 1);
    assert_eq!(
        restored.session(&session.id).unwrap().state,
        SessionState::Running
    );
    assert_eq!(restored.session(&session.id).unwrap().name, "keep");
    assert_eq!(restored.session(&idle.id).unwrap().state, SessionState::Created);
    restored.shutdown(false);
}
