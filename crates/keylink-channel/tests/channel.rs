mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{open_channel, settle, single_key, Behavior, ASSIGNED_CID};
use keylink_channel::{Channel, ChannelConfig, ChannelError};
use keylink_frame::{
    fragment, Frame, FrameError, Status, CID_BROADCAST, CMD_APDU, CMD_INIT, CMD_LOCK, CMD_PING,
    CMD_SYNC, CMD_WINK, MAX_MESSAGE_SIZE,
};
use keylink_transport::DeviceId;
use tokio::time::Instant;

fn status(result: keylink_channel::Result<impl Sized>) -> Status {
    match result {
        Err(ChannelError::Status(status)) => status,
        Err(other) => panic!("expected link status, got {other:?}"),
        Ok(_) => panic!("expected link status, got success"),
    }
}

#[tokio::test(start_paused = true)]
async fn init_assigns_cid_then_ping_echoes() {
    let (registry, key) = single_key(Behavior::default());
    let channel = open_channel(&registry);
    assert_eq!(channel.cid(), channel.default_cid());

    channel.sync().await.unwrap();
    assert_eq!(channel.cid(), ASSIGNED_CID);

    let init = &key.requests_for(CMD_INIT)[0];
    assert_eq!(init.cid, CID_BROADCAST);
    assert_eq!(init.data.len(), 8);

    let payload: Vec<u8> = (0..10).collect();
    let echo = channel.ping(&payload).await.unwrap();
    assert_eq!(&echo[..], payload.as_slice());

    let ping = &key.requests_for(CMD_PING)[0];
    assert_eq!(ping.cid, ASSIGNED_CID);
}

#[tokio::test(start_paused = true)]
async fn large_messages_roundtrip() {
    let (registry, key) = single_key(Behavior::default());
    let channel = open_channel(&registry);

    let payload: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
    let echo = channel.ping(&payload).await.unwrap();
    assert_eq!(&echo[..], payload.as_slice());
    assert_eq!(key.requests_for(CMD_PING)[0].data, payload);

    let random = channel.ping_random(100).await.unwrap();
    assert_eq!(random.len(), 100);
}

#[tokio::test(start_paused = true)]
async fn synced_channel_resyncs_with_sync() {
    let (registry, key) = single_key(Behavior::default());
    let channel = open_channel(&registry);

    channel.sync().await.unwrap();
    channel.sync().await.unwrap();

    assert_eq!(key.requests_for(CMD_INIT).len(), 1);
    let sync = &key.requests_for(CMD_SYNC)[0];
    assert_eq!(sync.cid, ASSIGNED_CID);
    assert_eq!(sync.data, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn init_unsupported_falls_back_to_sync() {
    let (registry, key) = single_key(Behavior {
        init_supported: false,
        echo_sync: false,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);
    let default = channel.default_cid();

    channel.sync().await.unwrap();

    // Only bits 8-23 are randomized.
    assert_eq!((channel.cid() ^ default) & 0xff00_00ff, 0);
    let requests = key.requests();
    assert_eq!(requests[0].cmd, CMD_INIT);
    assert_eq!(requests[1].cmd, CMD_SYNC);
    assert_eq!(requests[1].cid, channel.cid());
}

#[tokio::test(start_paused = true)]
async fn sync_times_out_after_six_attempts() {
    let (registry, key) = single_key(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);

    let start = Instant::now();
    assert_eq!(status(channel.sync().await), Status::Timeout);
    assert_eq!(start.elapsed(), Duration::from_millis(3000));
    assert_eq!(key.requests_for(CMD_INIT).len(), 6);
}

#[tokio::test(start_paused = true)]
async fn busy_is_retried_until_it_clears() {
    let (registry, key) = single_key(Behavior {
        busy_answers: 3,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);

    let echo = channel.ping(b"patience").await.unwrap();
    assert_eq!(&echo[..], b"patience");
    assert_eq!(key.requests_for(CMD_PING).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn busy_gives_up_within_budget() {
    let (registry, _key) = single_key(Behavior {
        always_busy: true,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);

    let start = Instant::now();
    assert_eq!(status(channel.ping(b"x").await), Status::Busy);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2500), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2600), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn out_of_order_continuation_is_invalid_seq() {
    let (registry, key) = single_key(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);
    let cid = channel.cid();

    let frames = fragment(cid, CMD_PING, &[7u8; 57 + 3 * 59]).unwrap();
    for i in [0, 1, 3, 2] {
        key.inject(frames[i]);
    }

    assert_eq!(status(channel.ping(b"x").await), Status::InvalidSequence);

    // The stray continuation still queued must not end up in the next reply.
    key.set_behavior(Behavior::default());
    assert_eq!(&channel.ping(b"after").await.unwrap()[..], b"after");
}

#[tokio::test(start_paused = true)]
async fn dropped_exchange_reply_is_not_handed_to_the_next() {
    let (registry, key) = single_key(Behavior {
        reply_delay: Duration::from_millis(500),
        ..Behavior::default()
    });
    let channel = open_channel(&registry);

    let cancelled = tokio::time::timeout(Duration::from_millis(100), channel.ping(b"first")).await;
    assert!(cancelled.is_err());
    assert!(!channel.is_busy());

    assert_eq!(&channel.ping(b"second").await.unwrap()[..], b"second");
    assert_eq!(key.requests_for(CMD_PING).len(), 2);

    key.set_behavior(Behavior::default());
    assert_eq!(&channel.ping(b"third").await.unwrap()[..], b"third");
}

#[tokio::test(start_paused = true)]
async fn init_frame_during_reassembly_is_kept_for_next_exchange() {
    let (registry, key) = single_key(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);
    let cid = channel.cid();

    let reply = fragment(cid, CMD_PING, &[1u8; 100]).unwrap();
    key.inject(reply[0]);
    key.inject(Frame::init(cid, CMD_WINK, 0, &[]));
    key.inject(reply[1]);

    let echo = channel.ping(&[1u8; 100]).await.unwrap();
    assert_eq!(echo.len(), 100);

    let wink = channel.wink().await.unwrap();
    assert!(wink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn frames_for_other_channels_are_ignored() {
    let (registry, key) = single_key(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);
    let cid = channel.cid();

    key.inject(Frame::init(cid ^ 1, CMD_PING, 3, b"bad"));
    key.inject(Frame::cont(cid, 0, b"stray"));
    key.inject(Frame::init(cid, CMD_PING, 2, b"ok"));

    assert_eq!(&channel.ping(b"ok").await.unwrap()[..], b"ok");
}

#[tokio::test(start_paused = true)]
async fn error_frame_with_ok_status_is_empty_success() {
    let (registry, key) = single_key(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);
    key.inject(Frame::error(channel.cid(), 0));

    assert!(channel.sysinfo().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn device_status_is_passed_through() {
    let (registry, key) = single_key(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);
    key.inject(Frame::error(channel.cid(), Status::AccessDenied.code() as u8));

    assert_eq!(status(channel.dfu(&[1, 2]).await), Status::AccessDenied);
    assert!(!channel.is_closed());
}

#[tokio::test(start_paused = true)]
async fn timeout_tears_down_device() {
    let (registry, key) = single_key(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let channel = open_channel(&registry);

    let start = Instant::now();
    assert_eq!(status(channel.ping(b"hello?").await), Status::Timeout);
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert!(key.is_closed());

    let before = key.requests().len();
    assert_eq!(status(channel.ping(b"again").await), Status::Gone);
    assert_eq!(key.requests().len(), before);
}

#[tokio::test(start_paused = true)]
async fn device_gone_reaches_every_channel_once() {
    let (registry, key) = single_key(Behavior {
        silent: true,
        ..Behavior::default()
    });
    let channels: Vec<Arc<Channel>> = (0..3).map(|_| Arc::new(open_channel(&registry))).collect();

    let pending: Vec<_> = channels
        .iter()
        .map(|channel| {
            let channel = Arc::clone(channel);
            tokio::spawn(async move { channel.ping(b"waiting").await })
        })
        .collect();
    settle().await;
    assert_eq!(key.requests_for(CMD_PING).len(), 3);

    key.unplug();
    for task in pending {
        assert_eq!(status(task.await.unwrap()), Status::Gone);
    }

    for channel in &channels {
        assert!(channel.is_closed());
        assert_eq!(status(channel.ping(b"later").await), Status::Gone);
        assert_eq!(status(channel.sync().await), Status::Gone);
    }
    assert_eq!(key.requests_for(CMD_PING).len(), 3);
    assert!(key.is_closed());
}

#[tokio::test(start_paused = true)]
async fn lock_shuts_out_other_channels() {
    let (registry, key) = single_key(Behavior::default());
    let holder = open_channel(&registry);
    let other = Channel::connect(
        Arc::clone(&registry),
        None,
        ChannelConfig {
            busy_budget: Duration::from_millis(1000),
            ..ChannelConfig::default()
        },
    )
    .unwrap();

    holder.lock(5).await.unwrap();
    let locked_at = Instant::now();
    assert_eq!(key.requests_for(CMD_LOCK).len(), 1);

    assert_eq!(status(other.ping(b"let me in").await), Status::Busy);
    assert!(key.requests_for(CMD_PING).is_empty());

    // The lock outlives its five seconds by a short slack.
    tokio::time::sleep_until(locked_at + Duration::from_millis(5050)).await;
    assert_eq!(status(other.sync().await), Status::Busy);
    assert!(key.requests_for(CMD_INIT).is_empty());

    tokio::time::sleep_until(locked_at + Duration::from_millis(5100)).await;
    assert_eq!(&other.ping(b"let me in").await.unwrap()[..], b"let me in");

    holder.lock(5).await.unwrap();
    holder.unlock().await.unwrap();
    assert_eq!(&other.ping(b"free").await.unwrap()[..], b"free");
}

#[tokio::test(start_paused = true)]
async fn lock_holder_apdu_is_sent_once_while_another_channel_syncs() {
    let (registry, key) = single_key(Behavior::default());
    let holder = open_channel(&registry);
    let newcomer = open_channel(&registry);

    holder.lock(10).await.unwrap();
    key.set_behavior(Behavior {
        reply_delay: Duration::from_millis(500),
        ..Behavior::default()
    });

    let (apdu, synced) = tokio::join!(holder.apdu(&[0x00, 0xa4, 0x04, 0x00]), async {
        settle().await;
        newcomer.sync().await
    });

    assert_eq!(status(synced), Status::Busy);
    assert_eq!(&apdu.unwrap()[..], &[0x90, 0x00]);
    assert_eq!(key.requests_for(CMD_APDU).len(), 1);
    assert!(key.requests_for(CMD_INIT).is_empty());
}

#[tokio::test(start_paused = true)]
async fn apdu_reply_strips_success_status_word() {
    let (registry, _key) = single_key(Behavior {
        apdu_reply: vec![0x01, 0x02, 0x03, 0x90, 0x00],
        ..Behavior::default()
    });
    let channel = open_channel(&registry);

    let body = channel.apdu_reply(&[0x00, 0x01, 0x03, 0x00], false).await.unwrap();
    assert_eq!(&body[..], &[0x01, 0x02, 0x03]);

    let raw = channel.apdu(&[0x00, 0x01, 0x03, 0x00]).await.unwrap();
    assert_eq!(&raw[..], &[0x01, 0x02, 0x03, 0x90, 0x00]);
}

#[tokio::test(start_paused = true)]
async fn apdu_reply_winks_when_touch_is_needed() {
    let (registry, key) = single_key(Behavior {
        apdu_reply: vec![0x69, 0x85],
        ..Behavior::default()
    });
    let channel = open_channel(&registry);

    let err = channel.apdu_reply(&[0x00, 0x02], false).await.unwrap_err();
    assert_eq!(err, ChannelError::Apdu(0x6985));
    assert_eq!(key.requests_for(CMD_WINK).len(), 1);

    let err = channel.apdu_reply(&[0x00, 0x02], true).await.unwrap_err();
    assert_eq!(err, ChannelError::Apdu(0x6985));
    assert_eq!(key.requests_for(CMD_WINK).len(), 1);
    assert_eq!(key.requests_for(CMD_APDU).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn apdu_reply_without_status_word() {
    let (registry, _key) = single_key(Behavior {
        apdu_reply: vec![0x90],
        ..Behavior::default()
    });
    let channel = open_channel(&registry);

    let err = channel.apdu_reply(&[0x00], false).await.unwrap_err();
    assert_eq!(err, ChannelError::Apdu(0));
}

#[tokio::test(start_paused = true)]
async fn oversized_request_is_rejected_locally() {
    let (registry, key) = single_key(Behavior::default());
    let channel = open_channel(&registry);

    let err = channel
        .apdu(&vec![0u8; MAX_MESSAGE_SIZE + 1])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChannelError::Frame(FrameError::PayloadTooLarge { .. })
    ));
    settle().await;
    assert!(key.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn open_without_devices_is_nodevice() {
    let registry = common::registry_with(Vec::new());
    let err = Channel::connect(registry, None, ChannelConfig::default()).unwrap_err();
    assert_eq!(err.code(), 512);
}

#[tokio::test(start_paused = true)]
async fn open_named_device() {
    let first = common::SimKey::new(Behavior::default());
    let second = common::SimKey::new(Behavior::default());
    let registry = common::registry_with(vec![first, Arc::clone(&second)]);

    let id = DeviceId::new("sim", 1);
    let channel =
        Channel::connect(Arc::clone(&registry), Some(id.clone()), ChannelConfig::default())
            .unwrap();
    assert_eq!(channel.device_id(), Some(id));
    assert_eq!(channel.default_cid() >> 24, 2);

    channel.ping(b"second").await.unwrap();
    assert_eq!(second.requests_for(CMD_PING).len(), 1);

    let missing = Channel::new(registry, ChannelConfig::default());
    let err = missing.open(Some(DeviceId::new("sim", 7))).unwrap_err();
    assert_eq!(err.status(), Some(Status::NoDevice));
}

#[tokio::test(start_paused = true)]
async fn close_detaches_after_grace_period() {
    let (registry, key) = single_key(Behavior::default());
    let channel = open_channel(&registry);

    channel.close();
    assert!(channel.is_closed());
    assert_eq!(status(channel.ping(b"x").await), Status::Gone);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!key.is_closed());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(key.is_closed());
    assert!(registry.open_devices().is_empty());

    let err = channel.open(None).unwrap_err();
    assert_eq!(err.status(), Some(Status::NoDevice));
}

#[tokio::test(start_paused = true)]
async fn close_when_idle_waits_for_pending_command() {
    let (registry, _key) = single_key(Behavior {
        reply_delay: Duration::from_millis(500),
        ..Behavior::default()
    });
    let channel = Arc::new(open_channel(&registry));

    let ping = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.ping(b"slow").await })
    };
    settle().await;
    assert!(channel.is_busy());

    channel.close_when_idle().await;
    assert!(channel.is_closed());
    assert_eq!(&ping.await.unwrap().unwrap()[..], b"slow");
}

#[tokio::test(start_paused = true)]
async fn close_when_idle_closes_idle_channel_now() {
    let (registry, _key) = single_key(Behavior::default());
    let channel = open_channel(&registry);

    channel.close_when_idle().await;
    assert!(channel.is_closed());
}

#[tokio::test(start_paused = true)]
async fn other_commands_use_their_codes() {
    let (registry, key) = single_key(Behavior::default());
    let channel = open_channel(&registry);

    channel.blink(2).await.unwrap();
    channel.reset().await.unwrap();
    channel.usb_test([1, 2, 3]).await.unwrap();

    let cmds: Vec<(u8, Vec<u8>)> = key
        .requests()
        .into_iter()
        .map(|r| (r.cmd, r.data))
        .collect();
    assert_eq!(
        cmds,
        vec![
            (keylink_frame::CMD_PROMPT, vec![2]),
            (keylink_frame::CMD_ATR, vec![]),
            (keylink_frame::CMD_USB_TEST, vec![1, 2, 3]),
        ]
    );
}
