use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{routing::post, Json, Router};
use glasshub::{
    AppStatus, CloudToGlassesMessage, CloudToTpaMessage, DisplayPriority, HubConfig, Layout,
    RegisteredApp, RelayError, SessionHub, StreamType,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

const CAPTIONS: &str = "com.example.captions";
const NOTIFY: &str = "com.example.notify";

/// Minimal TPA webhook endpoint answering with a fixed body.
async fn spawn_webhook_server(body: serde_json::Value) -> Result<String> {
    let app = Router::new().route("/webhook", post(move || async move { Json(body) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{}/webhook", addr))
}

fn test_hub(webhook_url: &str, handshake_ms: u64) -> Arc<SessionHub> {
    let config = HubConfig {
        handshake_timeout: Duration::from_millis(handshake_ms),
        ..HubConfig::default()
    };
    let apps = vec![
        RegisteredApp {
            package_name: CAPTIONS.to_string(),
            api_key: "captions-key".to_string(),
            webhook_url: webhook_url.to_string(),
        },
        RegisteredApp {
            package_name: NOTIFY.to_string(),
            api_key: "notify-key".to_string(),
            webhook_url: webhook_url.to_string(),
        },
    ];
    Arc::new(SessionHub::new(config, apps, None))
}

async fn recv_glasses(
    rx: &mut mpsc::UnboundedReceiver<CloudToGlassesMessage>,
) -> CloudToGlassesMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for glasses frame")
        .expect("glasses channel closed")
}

async fn recv_tpa(rx: &mut mpsc::UnboundedReceiver<CloudToTpaMessage>) -> CloudToTpaMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for TPA frame")
        .expect("TPA channel closed")
}

#[tokio::test]
async fn test_start_app_boots_and_connects() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, mut glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    hub.start_app(&session_id, CAPTIONS).await?;
    match recv_glasses(&mut glasses_rx).await {
        CloudToGlassesMessage::AppStateUpdate {
            package_name,
            status,
            ..
        } => {
            assert_eq!(package_name, CAPTIONS);
            assert_eq!(status, AppStatus::Booting);
        }
        other => panic!("expected app_state_update, got {:?}", other),
    }

    let (tpa_tx, mut tpa_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", tpa_tx)
        .await?;

    assert!(matches!(
        recv_tpa(&mut tpa_rx).await,
        CloudToTpaMessage::TpaConnectionAck { .. }
    ));
    assert!(matches!(
        recv_glasses(&mut glasses_rx).await,
        CloudToGlassesMessage::AppStateUpdate {
            status: AppStatus::Running,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_unknown_app_reports_not_installed() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, mut glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    let err = hub.start_app(&session_id, "com.example.ghost").await.unwrap_err();
    assert!(matches!(err, RelayError::AppNotFound(_)));
    assert!(matches!(
        recv_glasses(&mut glasses_rx).await,
        CloudToGlassesMessage::AppStateUpdate {
            status: AppStatus::NotInstalled,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_webhook_rejection_marks_app_error() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "error", "message": "no capacity"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, mut glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    let err = hub.start_app(&session_id, CAPTIONS).await.unwrap_err();
    assert!(matches!(err, RelayError::WebhookRejected(_)));

    assert!(matches!(
        recv_glasses(&mut glasses_rx).await,
        CloudToGlassesMessage::AppStateUpdate {
            status: AppStatus::Booting,
            ..
        }
    ));
    match recv_glasses(&mut glasses_rx).await {
        CloudToGlassesMessage::AppStateUpdate { status, error, .. } => {
            assert_eq!(status, AppStatus::Error);
            assert!(error.unwrap().contains("no capacity"));
        }
        other => panic!("expected app_state_update, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_handshake_timeout_flags_error() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 50);

    let (glasses_tx, mut glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    hub.start_app(&session_id, CAPTIONS).await?;
    assert!(matches!(
        recv_glasses(&mut glasses_rx).await,
        CloudToGlassesMessage::AppStateUpdate {
            status: AppStatus::Booting,
            ..
        }
    ));

    // No init arrives; the timer fires and the app lands in error state.
    assert!(matches!(
        recv_glasses(&mut glasses_rx).await,
        CloudToGlassesMessage::AppStateUpdate {
            status: AppStatus::Error,
            ..
        }
    ));

    // A late init is refused.
    let (tpa_tx, _tpa_rx) = mpsc::unbounded_channel();
    let err = hub
        .handle_tpa_init(&session_id, CAPTIONS, "captions-key", tpa_tx)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::NotPending { .. }));
    Ok(())
}

#[tokio::test]
async fn test_tpa_init_rejects_bad_key() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;
    hub.start_app(&session_id, CAPTIONS).await?;

    let (tpa_tx, _tpa_rx) = mpsc::unbounded_channel();
    let err = hub
        .handle_tpa_init(&session_id, CAPTIONS, "wrong-key", tpa_tx)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::CredentialInvalid { .. }));
    Ok(())
}

#[tokio::test]
async fn test_targeted_fan_out_and_delivery_isolation() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    hub.start_app(&session_id, CAPTIONS).await?;
    hub.start_app(&session_id, NOTIFY).await?;

    let (captions_tx, mut captions_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", captions_tx)
        .await?;
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, NOTIFY, "notify-key", notify_tx)
        .await?;
    recv_tpa(&mut captions_rx).await; // ack
    recv_tpa(&mut notify_rx).await; // ack

    hub.handle_subscription_update(&session_id, CAPTIONS, &["transcription".to_string()])
        .await?;
    hub.handle_subscription_update(&session_id, NOTIFY, &["button_press".to_string()])
        .await?;

    hub.handle_transcription(&session_id, "hello world", false, None)
        .await;
    match recv_tpa(&mut captions_rx).await {
        CloudToTpaMessage::DataStream { stream_type, data } => {
            assert_eq!(stream_type, StreamType::Transcription);
            assert_eq!(data["text"], "hello world");
            assert_eq!(data["isFinal"], false);
        }
        other => panic!("expected data_stream, got {:?}", other),
    }
    assert!(notify_rx.try_recv().is_err());

    // A closed subscriber must not affect the others.
    drop(captions_rx);
    hub.handle_transcription(&session_id, "still here", true, None)
        .await;

    let frame = r#"{"type":"button_press","buttonId":"main","pressType":"short"}"#;
    hub.dispatch_glasses_frame(&session_id, frame).await;
    match recv_tpa(&mut notify_rx).await {
        CloudToTpaMessage::DataStream { stream_type, data } => {
            assert_eq!(stream_type, StreamType::ButtonPress);
            assert_eq!(data["buttonId"], "main");
        }
        other => panic!("expected data_stream, got {:?}", other),
    }

    // Unknown frame types are dropped without disturbing anything.
    hub.dispatch_glasses_frame(&session_id, r#"{"type":"teleport"}"#)
        .await;
    assert!(notify_rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_reconnect_replaces_channel() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;
    hub.start_app(&session_id, CAPTIONS).await?;

    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", first_tx)
        .await?;
    recv_tpa(&mut first_rx).await; // ack

    let (second_tx, mut second_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", second_tx)
        .await?;
    recv_tpa(&mut second_rx).await; // ack

    // The displaced sender is dropped, closing the first channel.
    assert!(timeout(Duration::from_secs(1), first_rx.recv())
        .await?
        .is_none());

    hub.handle_subscription_update(&session_id, CAPTIONS, &["transcription".to_string()])
        .await?;
    hub.handle_transcription(&session_id, "to the new channel", false, None)
        .await;
    assert!(matches!(
        recv_tpa(&mut second_rx).await,
        CloudToTpaMessage::DataStream { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn test_display_request_pushes_layout_and_autoclears() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, mut glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    let accepted = hub
        .handle_display_request(
            &session_id,
            CAPTIONS,
            Layout::TextWall {
                text: "caption line".to_string(),
            },
            DisplayPriority::App,
            Some(50),
        )
        .await;
    assert!(accepted);

    match recv_glasses(&mut glasses_rx).await {
        CloudToGlassesMessage::DisplayEvent { layout, duration_ms } => {
            assert!(matches!(layout, Layout::TextWall { text } if text == "caption line"));
            assert_eq!(duration_ms, Some(50));
        }
        other => panic!("expected display_event, got {:?}", other),
    }

    // After the duration the hub pushes a blank layout.
    match recv_glasses(&mut glasses_rx).await {
        CloudToGlassesMessage::DisplayEvent { layout, .. } => {
            assert_eq!(layout, Layout::empty());
        }
        other => panic!("expected display_event, got {:?}", other),
    }
    assert!(hub.active_display(&session_id).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_display_request_after_end_session_is_rejected() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;
    hub.end_session(&session_id).await;

    // A TPA connection that outlived the session must not resurrect
    // arbitrator state.
    let accepted = hub
        .handle_display_request(
            &session_id,
            CAPTIONS,
            Layout::TextWall {
                text: "ghost".to_string(),
            },
            DisplayPriority::App,
            None,
        )
        .await;
    assert!(!accepted);
    assert!(hub.active_display(&session_id).await.is_none());
    assert!(hub.display_history(&session_id, CAPTIONS).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_display_pushes_follow_arbitration_order() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, mut glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    // Two TPAs racing on one session: whichever request wins arbitration
    // last must also be the last display_event the glasses see.
    for round in 0..50u32 {
        let first = {
            let hub = Arc::clone(&hub);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                hub.handle_display_request(
                    &session_id,
                    CAPTIONS,
                    Layout::TextWall {
                        text: format!("captions {}", round),
                    },
                    DisplayPriority::App,
                    None,
                )
                .await
            })
        };
        let second = {
            let hub = Arc::clone(&hub);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                hub.handle_display_request(
                    &session_id,
                    NOTIFY,
                    Layout::TextWall {
                        text: format!("notify {}", round),
                    },
                    DisplayPriority::App,
                    None,
                )
                .await
            })
        };
        assert!(first.await?);
        assert!(second.await?);
    }

    let active = hub.active_display(&session_id).await.unwrap();
    let mut last_pushed = None;
    while let Ok(frame) = glasses_rx.try_recv() {
        if let CloudToGlassesMessage::DisplayEvent { layout, .. } = frame {
            last_pushed = Some(layout);
        }
    }
    assert_eq!(last_pushed.unwrap(), active.layout);
    Ok(())
}

#[tokio::test]
async fn test_superseded_display_timer_does_not_clear() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, mut glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    hub.handle_display_request(
        &session_id,
        CAPTIONS,
        Layout::TextWall {
            text: "short lived".to_string(),
        },
        DisplayPriority::App,
        Some(50),
    )
    .await;
    hub.handle_display_request(
        &session_id,
        NOTIFY,
        Layout::TextWall {
            text: "takes over".to_string(),
        },
        DisplayPriority::App,
        None,
    )
    .await;

    recv_glasses(&mut glasses_rx).await;
    recv_glasses(&mut glasses_rx).await;

    // The first request's timer fires into a slot it no longer owns.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(glasses_rx.try_recv().is_err());

    let active = hub.active_display(&session_id).await.unwrap();
    assert_eq!(active.package_name, NOTIFY);
    Ok(())
}

#[tokio::test]
async fn test_subscription_error_is_atomic() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;
    hub.start_app(&session_id, CAPTIONS).await?;

    let (tpa_tx, mut tpa_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", tpa_tx)
        .await?;
    recv_tpa(&mut tpa_rx).await; // ack

    hub.handle_subscription_update(&session_id, CAPTIONS, &["transcription".to_string()])
        .await?;
    let err = hub
        .handle_subscription_update(
            &session_id,
            CAPTIONS,
            &["transcription".to_string(), "bogus".to_string()],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidSubscriptionToken(_)));

    // The TPA is told its update was rejected.
    match recv_tpa(&mut tpa_rx).await {
        CloudToTpaMessage::TpaConnectionError { code, .. } => {
            assert_eq!(code.as_deref(), Some("invalid_subscription"));
        }
        other => panic!("expected tpa_connection_error, got {:?}", other),
    }

    let (subscriptions, _history) = hub.subscription_state(&session_id, CAPTIONS).await;
    assert_eq!(subscriptions, vec![StreamType::Transcription]);
    Ok(())
}

#[tokio::test]
async fn test_audio_gated_on_media_subscriptions() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    hub.start_app(&session_id, NOTIFY).await?;
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, NOTIFY, "notify-key", notify_tx)
        .await?;
    recv_tpa(&mut notify_rx).await; // ack
    hub.handle_subscription_update(&session_id, NOTIFY, &["button_press".to_string()])
        .await?;

    // Nothing in the session wants media, so the frame is dropped.
    hub.handle_audio(&session_id, &[0u8; 16]).await;
    assert!(notify_rx.try_recv().is_err());

    hub.start_app(&session_id, CAPTIONS).await?;
    let (captions_tx, mut captions_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", captions_tx)
        .await?;
    recv_tpa(&mut captions_rx).await; // ack
    hub.handle_subscription_update(&session_id, CAPTIONS, &["audio_chunk".to_string()])
        .await?;

    hub.handle_audio(&session_id, &[0u8; 16]).await;
    match recv_tpa(&mut captions_rx).await {
        CloudToTpaMessage::DataStream { stream_type, data } => {
            assert_eq!(stream_type, StreamType::AudioChunk);
            assert!(data["pcm"].is_string());
            assert_eq!(data["sequence"], 1);
        }
        other => panic!("expected data_stream, got {:?}", other),
    }
    // The gated frame never consumed a sequence number.
    assert!(notify_rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_stop_app_clears_subscriptions_and_channel() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, mut glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;
    hub.start_app(&session_id, CAPTIONS).await?;

    let (tpa_tx, mut tpa_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", tpa_tx)
        .await?;
    recv_tpa(&mut tpa_rx).await; // ack
    hub.handle_subscription_update(&session_id, CAPTIONS, &["transcription".to_string()])
        .await?;

    hub.stop_app(&session_id, CAPTIONS).await?;

    // Booting, Running, then Stopped.
    recv_glasses(&mut glasses_rx).await;
    recv_glasses(&mut glasses_rx).await;
    assert!(matches!(
        recv_glasses(&mut glasses_rx).await,
        CloudToGlassesMessage::AppStateUpdate {
            status: AppStatus::Stopped,
            ..
        }
    ));

    let (subscriptions, _) = hub.subscription_state(&session_id, CAPTIONS).await;
    assert!(subscriptions.is_empty());

    // The channel was closed by dropping its sender.
    assert!(timeout(Duration::from_secs(1), tpa_rx.recv()).await?.is_none());

    hub.handle_transcription(&session_id, "nobody listens", true, None)
        .await;
    Ok(())
}

#[tokio::test]
async fn test_transport_close_keeps_subscriptions() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;
    hub.start_app(&session_id, CAPTIONS).await?;

    let (tpa_tx, mut tpa_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", tpa_tx)
        .await?;
    recv_tpa(&mut tpa_rx).await; // ack
    hub.handle_subscription_update(&session_id, CAPTIONS, &["transcription".to_string()])
        .await?;

    hub.handle_transport_close(&session_id, CAPTIONS).await;

    // Not live any more, so nothing is delivered.
    hub.handle_transcription(&session_id, "into the void", true, None)
        .await;
    assert!(timeout(Duration::from_secs(1), tpa_rx.recv()).await?.is_none());

    // Subscriptions survive until session teardown.
    let (subscriptions, _) = hub.subscription_state(&session_id, CAPTIONS).await;
    assert_eq!(subscriptions, vec![StreamType::Transcription]);
    Ok(())
}

#[tokio::test]
async fn test_end_session_tears_everything_down() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;
    hub.start_app(&session_id, CAPTIONS).await?;

    let (tpa_tx, mut tpa_rx) = mpsc::unbounded_channel();
    hub.handle_tpa_init(&session_id, CAPTIONS, "captions-key", tpa_tx)
        .await?;
    recv_tpa(&mut tpa_rx).await; // ack

    hub.handle_display_request(
        &session_id,
        CAPTIONS,
        Layout::TextWall {
            text: "bye".to_string(),
        },
        DisplayPriority::App,
        None,
    )
    .await;

    hub.end_session(&session_id).await;

    assert!(!hub.has_session(&session_id).await);
    assert!(hub.session_summary(&session_id).await.is_none());
    assert!(hub.active_display(&session_id).await.is_none());
    assert!(hub.display_history(&session_id, CAPTIONS).await.is_empty());

    // Dropping the session drops the TPA sender too.
    assert!(timeout(Duration::from_secs(1), tpa_rx.recv()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_transcription_builds_caption_view() -> Result<()> {
    let url = spawn_webhook_server(json!({"status": "success"})).await?;
    let hub = test_hub(&url, 5000);

    let (glasses_tx, _glasses_rx) = mpsc::unbounded_channel();
    let session_id = hub.create_session("user-1", glasses_tx).await;

    hub.handle_transcription(&session_id, "hello", true, None).await;
    hub.handle_transcription(&session_id, "wor", false, None).await;

    let (view, segments) = hub.transcript_of(&session_id).await.unwrap();
    assert!(view.starts_with("hello wor"));
    // Only finals land in the segment history.
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].text, "hello");
    assert!(segments[0].is_final);
    Ok(())
}
