//! Integration tests for the engine supervisor.
//!
//! Engines and container runtimes are replaced by small shell scripts.

#[cfg(unix)]
mod supervisor_tests {
    use focus_bridge::bridge::{BridgeError, BridgeState, Fault, Notification, Supervisor};
    use focus_bridge::config::{BackendKind, BridgeConfig};
    use focus_bridge::protocol::{EngineErrorKind, FocusState};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn native_config(binary: PathBuf) -> BridgeConfig {
        BridgeConfig {
            backend: BackendKind::Native,
            api_key: "test-key".to_string(),
            binary_path: Some(binary),
            ..Default::default()
        }
    }

    fn next(supervisor: &Supervisor) -> Notification {
        supervisor
            .receiver()
            .recv_timeout(WAIT)
            .expect("timed out waiting for a notification")
    }

    /// Collect notifications up to and including `Close`.
    fn until_close(supervisor: &Supervisor) -> (Vec<Notification>, Option<i32>) {
        let mut seen = Vec::new();
        loop {
            match next(supervisor) {
                Notification::Close(code) => return (seen, code),
                other => seen.push(other),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ready_then_crash_reports_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(
            tmp.path(),
            "engine",
            r#"echo '{"type":"ready","data":{}}'
echo '{"type":"focus","data":{"state":"focused","focus_score":0.9,"face_detected":true}}'
exit 137"#,
        );

        let supervisor = Supervisor::new();
        supervisor.start(native_config(engine)).await.unwrap();

        let (seen, code) = until_close(&supervisor);
        assert_eq!(seen[0], Notification::Ready);
        match &seen[1] {
            Notification::Focus(reading) => {
                assert_eq!(reading.state, FocusState::Focused);
                assert!((reading.focus_score - 0.9).abs() < 1e-9);
            }
            other => panic!("expected focus, got {other:?}"),
        }
        assert_eq!(code, Some(137));
        assert!(!supervisor.running());
        assert_eq!(supervisor.state(), BridgeState::Error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clean_exit_is_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(tmp.path(), "engine", r#"echo '{"type":"ready"}'"#);

        let supervisor = Supervisor::new();
        supervisor.start(native_config(engine)).await.unwrap();

        let (seen, code) = until_close(&supervisor);
        assert_eq!(seen, vec![Notification::Ready]);
        assert_eq!(code, Some(0));
        assert_eq!(supervisor.state(), BridgeState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_start_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(
            tmp.path(),
            "engine",
            r#"echo '{"type":"ready","data":{}}'
exec sleep 30"#,
        );

        let supervisor = Supervisor::new();
        let first = supervisor.start(native_config(engine.clone())).await.unwrap();
        assert_eq!(next(&supervisor), Notification::Ready);
        assert!(supervisor.running());

        let second = supervisor.start(native_config(engine)).await;
        assert!(matches!(second, Err(BridgeError::AlreadyRunning)));
        assert_eq!(supervisor.session_id(), Some(first));
        assert_eq!(supervisor.state(), BridgeState::Ready);
        assert!(supervisor.running());

        supervisor.stop().await;
        let (_, code) = until_close(&supervisor);
        assert_eq!(code, None);
        assert_eq!(supervisor.state(), BridgeState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_double_stop_closes_once() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(
            tmp.path(),
            "engine",
            r#"echo '{"type":"ready","data":{}}'
exec sleep 30"#,
        );

        let supervisor = Supervisor::new();
        supervisor.start(native_config(engine)).await.unwrap();
        assert_eq!(next(&supervisor), Notification::Ready);

        supervisor.stop().await;
        supervisor.stop().await;
        let (seen, _) = until_close(&supervisor);
        assert!(seen.is_empty());
        assert!(!supervisor.running());

        // Stop after exit is also a no-op
        supervisor.stop().await;
        assert!(supervisor
            .receiver()
            .recv_timeout(Duration::from_millis(300))
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_after_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(tmp.path(), "engine", r#"echo '{"type":"ready"}'"#);

        let supervisor = Supervisor::new();
        let first = supervisor.start(native_config(engine.clone())).await.unwrap();
        until_close(&supervisor);

        let second = supervisor.start(native_config(engine)).await.unwrap();
        assert_ne!(first, second);
        until_close(&supervisor);
        assert_eq!(supervisor.stats().stats().sessions_started, 2);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let supervisor = Supervisor::new();
        supervisor.stop().await;
        assert_eq!(supervisor.state(), BridgeState::Idle);
        assert!(supervisor.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(tmp.path(), "engine", "exit 0");
        let config = BridgeConfig {
            api_key: "   ".to_string(),
            ..native_config(engine)
        };

        let supervisor = Supervisor::new();
        let result = supervisor.start(config).await;
        assert!(matches!(result, Err(BridgeError::MissingCredential)));
        assert_eq!(supervisor.state(), BridgeState::Error);
        assert!(supervisor.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_binary_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("no-such-engine");
        let candidates = focus_bridge::bridge::native::candidate_paths(Some(&missing));
        if candidates.iter().any(|p| p.is_file()) {
            // An engine is installed in this environment
            return;
        }

        let supervisor = Supervisor::new();
        match supervisor.start(native_config(missing.clone())).await {
            Err(BridgeError::BinaryNotFound { searched }) => assert_eq!(searched[0], missing),
            other => panic!("expected BinaryNotFound, got {other:?}"),
        }
        assert_eq!(supervisor.state(), BridgeState::Error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_failure_reports_error_without_close() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = tmp.path().join("engine");
        std::fs::write(&engine, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o644)).unwrap();

        let supervisor = Supervisor::new();
        let result = supervisor.start(native_config(engine)).await;
        assert!(matches!(result, Err(BridgeError::SpawnFailed { .. })));
        assert_eq!(supervisor.state(), BridgeState::Error);
        assert!(!supervisor.running());

        match next(&supervisor) {
            Notification::Error(Fault::Process(message)) => {
                assert!(message.contains("Failed to spawn"));
            }
            other => panic!("expected process error, got {other:?}"),
        }
        assert!(supervisor
            .receiver()
            .recv_timeout(Duration::from_millis(300))
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bad_lines_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(
            tmp.path(),
            "engine",
            r#"echo '{"type":"ready","data":{}}'
echo 'not json at all'
echo '{"type":"heartbeat","data":{}}'
echo ''
echo '{"type":"status","data":{"status":"warming up"}}'
echo '{"type":"metrics","data":{"fps":29.5}}'"#,
        );

        let supervisor = Supervisor::new();
        supervisor.start(native_config(engine)).await.unwrap();

        let (seen, code) = until_close(&supervisor);
        assert_eq!(code, Some(0));
        assert_eq!(
            seen,
            vec![
                Notification::Ready,
                Notification::Status("warming up".to_string()),
                Notification::Metrics(serde_json::json!({"fps": 29.5})),
            ]
        );

        let stats = supervisor.stats().stats();
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.unrecognized_events, 1);
        assert_eq!(stats.events_dispatched, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_line_split_across_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(
            tmp.path(),
            "engine",
            r#"printf '{"type":"sta'
sleep 0.2
printf 'tus","data":{"status":"calibrating"}}\n'
printf '{"type":"status","data":{"status":"never terminated"}}'"#,
        );

        let supervisor = Supervisor::new();
        supervisor.start(native_config(engine)).await.unwrap();

        let (seen, _) = until_close(&supervisor);
        assert_eq!(seen, vec![Notification::Status("calibrating".to_string())]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_engine_error_does_not_end_session() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = write_script(
            tmp.path(),
            "engine",
            r#"echo '{"type":"ready","data":{}}'
echo '{"type":"error","data":{"message":"Usage credits exhausted for this key"}}'
echo '{"type":"status","data":{"message":"still here"}}'"#,
        );

        let supervisor = Supervisor::new();
        supervisor.start(native_config(engine)).await.unwrap();

        let (seen, _) = until_close(&supervisor);
        assert_eq!(seen.len(), 3);
        match &seen[1] {
            Notification::Error(Fault::Engine(e)) => {
                assert_eq!(e.kind(), EngineErrorKind::UsageExhausted);
                assert!(e.is_fatal());
            }
            other => panic!("expected engine error, got {other:?}"),
        }
        assert_eq!(seen[2], Notification::Status("still here".to_string()));
        assert_eq!(supervisor.stats().stats().engine_errors, 1);
    }

    #[tokio::test]
    async fn test_unavailable_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            runtime: "/nonexistent/docker".to_string(),
            api_key: "k".to_string(),
            shared_dir: Some(tmp.path().join("frames")),
            ..Default::default()
        };

        let supervisor = Supervisor::new();
        let result = supervisor.start(config).await;
        assert!(matches!(result, Err(BridgeError::RuntimeUnavailable { .. })));
        assert!(!tmp.path().join("frames").exists());
    }

    /// A fake container runtime: `run` records its arguments and pid, prints
    /// `ready`, and becomes a long sleep that `stop` kills.
    fn fake_runtime(dir: &Path, image_present: bool, build_exit: i32) -> PathBuf {
        let state = dir.join("state");
        std::fs::create_dir_all(&state).unwrap();
        let inspect_exit = if image_present { 0 } else { 1 };
        let body = format!(
            r#"STATE="{state}"
case "$1" in
  info) exit 0 ;;
  image) exit {inspect_exit} ;;
  build)
    echo "Step 1/2 : FROM scratch"
    echo "warning: from stderr" >&2
    sleep 0.5
    exit {build_exit} ;;
  rm) exit 0 ;;
  run)
    shift
    echo "$@" > "$STATE/args"
    echo $$ > "$STATE/pid"
    echo '{{"type":"ready","data":{{}}}}'
    exec sleep 30 ;;
  stop)
    kill "$(cat "$STATE/pid")"
    exit 0 ;;
esac
exit 2"#,
            state = state.display(),
        );
        write_script(dir, "docker", &body)
    }

    fn container_config(runtime: &Path, frames: PathBuf) -> BridgeConfig {
        BridgeConfig {
            backend: BackendKind::Container,
            runtime: runtime.display().to_string(),
            api_key: "secret-key".to_string(),
            image: "engine:test".to_string(),
            shared_dir: Some(frames),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_container_session_exchanges_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(tmp.path(), true, 0);
        let frames_dir = tmp.path().join("frames");
        std::fs::create_dir_all(&frames_dir).unwrap();
        std::fs::write(frames_dir.join("frame0000000000000001.jpg"), b"stale").unwrap();

        let supervisor = Supervisor::new();
        supervisor
            .start(container_config(&runtime, frames_dir.clone()))
            .await
            .unwrap();
        assert_eq!(next(&supervisor), Notification::Ready);
        assert_eq!(supervisor.backend(), Some(BackendKind::Container));

        // Leftovers from a previous run are gone
        assert!(!frames_dir.join("frame0000000000000001.jpg").exists());

        let args = std::fs::read_to_string(tmp.path().join("state/args")).unwrap();
        assert!(args.contains("--name focus-bridge-engine"));
        assert!(args.contains(&format!("-v {}:/frames", frames_dir.display())));
        assert!(args.contains("FOCUS_API_KEY=secret-key"));
        assert!(args.contains("engine:test --server_mode"));

        let channel = supervisor.frame_channel().expect("container session has frames");
        channel.write_frame(1_000, b"jpeg-1");
        channel.write_frame(500, b"jpeg-0");
        assert_eq!(
            std::fs::read(frames_dir.join("frame0000000000001000.jpg")).unwrap(),
            b"jpeg-1"
        );
        assert_eq!(channel.frame_count(), 2);

        supervisor.stop().await;
        let (_, code) = until_close(&supervisor);
        assert_eq!(code, None);
        assert_eq!(supervisor.state(), BridgeState::Stopped);
        assert!(!frames_dir.exists());

        // Frames written after teardown are dropped
        channel.write_frame(2_000, b"late");
        assert!(!frames_dir.exists());
        let stats = supervisor.stats().stats();
        assert_eq!(stats.frames_written, 2);
        assert_eq!(stats.frames_dropped, 1);
    }

    /// Start a session in the background and record every state seen
    /// until `start` returns.
    async fn states_during_start(config: BridgeConfig) -> (Arc<Supervisor>, Vec<BridgeState>) {
        let supervisor = Arc::new(Supervisor::new());
        let starter = supervisor.clone();
        let handle = tokio::spawn(async move { starter.start(config).await });

        let mut seen = Vec::new();
        while !handle.is_finished() {
            let state = supervisor.state();
            if seen.last() != Some(&state) {
                seen.push(state);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.await.unwrap().unwrap();
        (supervisor, seen)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_preparing_only_while_building() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(tmp.path(), false, 0);
        let (supervisor, seen) =
            states_during_start(container_config(&runtime, tmp.path().join("frames"))).await;
        assert!(seen.contains(&BridgeState::Preparing), "states: {seen:?}");
        supervisor.stop().await;
        until_close(&supervisor);

        let tmp = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(tmp.path(), true, 0);
        let (supervisor, seen) =
            states_during_start(container_config(&runtime, tmp.path().join("frames"))).await;
        assert!(!seen.contains(&BridgeState::Preparing), "states: {seen:?}");
        supervisor.stop().await;
        until_close(&supervisor);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_image_build() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(tmp.path(), false, 3);

        let supervisor = Supervisor::new();
        let result = supervisor
            .start(container_config(&runtime, tmp.path().join("frames")))
            .await;
        match result {
            Err(BridgeError::ImageBuildFailed { image, exit_code }) => {
                assert_eq!(image, "engine:test");
                assert_eq!(exit_code, Some(3));
            }
            other => panic!("expected ImageBuildFailed, got {other:?}"),
        }
        assert_eq!(supervisor.state(), BridgeState::Error);

        let mut progress = Vec::new();
        while let Some(notification) = supervisor.try_recv() {
            if let Notification::Progress(line) = notification {
                progress.push(line);
            }
        }
        assert!(progress.contains(&"Step 1/2 : FROM scratch".to_string()));
        assert!(progress.contains(&"warning: from stderr".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_prepare_image_skips_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(tmp.path(), true, 3);

        let supervisor = Supervisor::new();
        supervisor
            .prepare_image(&container_config(&runtime, tmp.path().join("frames")))
            .await
            .unwrap();
        assert!(supervisor.try_recv().is_none());
    }
}
