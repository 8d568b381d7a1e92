// Host task tests, driven on paused tokio time

use std::time::Duration;

use swivel_rs::host::{HostError, HostReply, RotationHost, demo_vessel, parse_command};
use swivel_rs::{Config, RotatorId};

#[tokio::test(start_paused = true)]
async fn test_rotation_runs_on_the_host_tick() {
    let (handle, task) = RotationHost::new(demo_vessel(Config::default()).unwrap()).spawn();

    assert!(handle.rotate(RotatorId(1), 30.0, Some(30.0)).await.unwrap());
    tokio::time::sleep(Duration::from_secs(10)).await;

    let status = handle.status().await.unwrap();
    assert!(status.tick >= 400);
    let hinge = &status.rotators[0];
    assert!(!hinge.rotating);
    assert!((hinge.angle - 30.0).abs() < 1e-6);
    assert_eq!(status.in_motion, 0);
    assert_eq!(status.engaged_locks, 1);

    handle.shutdown();
    let vessel = task.await.unwrap();
    assert!((vessel.current_angle(RotatorId(1)).unwrap() - 30.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_rotator_is_a_request_error() {
    let (handle, _task) = RotationHost::new(demo_vessel(Config::default()).unwrap()).spawn();
    assert!(matches!(
        handle.rotate(RotatorId(9), 10.0, None).await,
        Err(HostError::Request(_))
    ));
    assert!(matches!(handle.stop(RotatorId(9)).await, Err(HostError::Request(_))));
}

#[tokio::test(start_paused = true)]
async fn test_commands_round_trip_through_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vessel.json");
    let (handle, _task) = RotationHost::new(demo_vessel(Config::default()).unwrap()).spawn();

    let reply = handle.execute(parse_command("rails on").unwrap()).await.unwrap();
    assert_eq!(reply, HostReply::Dispatched { notified: 2, failures: 0 });
    assert!(handle.status().await.unwrap().on_rails);

    let save = format!("save {}", path.display());
    assert_eq!(handle.execute(parse_command(&save).unwrap()).await.unwrap(), HostReply::Done);
    assert!(path.exists());

    let load = format!("load {}", path.display());
    let reply = handle.execute(parse_command(&load).unwrap()).await.unwrap();
    assert_eq!(reply, HostReply::Dispatched { notified: 2, failures: 0 });
    assert!(!handle.status().await.unwrap().on_rails);

    let reply = handle.execute(parse_command("cw R1").unwrap()).await.unwrap();
    assert_eq!(reply, HostReply::Accepted { accepted: true });
    tokio::time::sleep(Duration::from_secs(10)).await;
    let status = handle.status().await.unwrap();
    assert!((status.rotators[0].angle - 15.0).abs() < 1e-6);

    assert_eq!(handle.execute(parse_command("quit").unwrap()).await.unwrap(), HostReply::Quit);
}

#[tokio::test(start_paused = true)]
async fn test_target_and_airspeed_commands() {
    let (handle, _task) = RotationHost::new(demo_vessel(Config::default()).unwrap()).spawn();

    let reply = handle.execute(parse_command("target R1 20").unwrap()).await.unwrap();
    assert_eq!(reply, HostReply::Accepted { accepted: true });
    tokio::time::sleep(Duration::from_secs(10)).await;
    let status = handle.status().await.unwrap();
    assert!((status.rotators[0].angle - 20.0).abs() < 1e-6);
    assert_eq!(status.rotators[0].commanded, 20.0);

    // already there
    let reply = handle.execute(parse_command("target R1 20").unwrap()).await.unwrap();
    assert_eq!(reply, HostReply::Accepted { accepted: false });

    assert_eq!(handle.execute(parse_command("airspeed 80").unwrap()).await.unwrap(), HostReply::Done);
    assert_eq!(handle.execute(parse_command("airspeed off").unwrap()).await.unwrap(), HostReply::Done);
}
