use super::*;

#[test]
fn burst_of_keystrokes_starts_once_and_rearms_timer() {
    let mut typing = TypingController::new();
    let updates: Vec<LocalUpdate> = ["h", "he", "hel", "hell", "hello"]
        .into_iter()
        .map(|content| typing.on_input_changed(content))
        .collect();

    let starts = updates.iter().filter(|u| u.emit == Some(true)).count();
    assert_eq!(starts, 1);
    assert!(updates.iter().all(|u| u.arm_timer.is_some()));
    assert!(typing.is_typing());

    let stale = updates[0].arm_timer.expect("armed");
    assert!(!typing.on_local_timer(stale));
    let latest = updates[4].arm_timer.expect("armed");
    assert!(typing.on_local_timer(latest));
    assert!(!typing.is_typing());
    assert!(!typing.on_local_timer(latest));
}

#[test]
fn clearing_input_stops_immediately_and_cancels_timer() {
    let mut typing = TypingController::new();
    let armed = typing.on_input_changed("hi").arm_timer.expect("armed");

    let cleared = typing.on_input_changed("   ");
    assert_eq!(cleared.emit, Some(false));
    assert_eq!(cleared.arm_timer, None);
    assert!(!typing.on_local_timer(armed));

    assert_eq!(typing.on_input_changed("").emit, None);
}

#[test]
fn typing_again_after_stop_restarts() {
    let mut typing = TypingController::new();
    let armed = typing.set_local(true).arm_timer.expect("armed");
    assert!(typing.on_local_timer(armed));
    assert_eq!(typing.set_local(true).emit, Some(true));
}

#[test]
fn remote_flag_follows_events_and_expires() {
    let mut typing = TypingController::new();
    let first = typing.on_remote(true);
    assert!(first.changed);
    let second = typing.on_remote(true);
    assert!(!second.changed);

    assert!(!typing.on_remote_timeout(first.arm_timer.expect("armed")));
    assert!(typing.other_typing());
    assert!(typing.on_remote_timeout(second.arm_timer.expect("armed")));
    assert!(!typing.other_typing());

    let stop = typing.on_remote(false);
    assert!(!stop.changed);
    assert_eq!(stop.arm_timer, None);
}

#[test]
fn peer_message_clears_remote_typing() {
    let mut typing = TypingController::new();
    let armed = typing.on_remote(true).arm_timer.expect("armed");
    assert!(typing.clear_remote());
    assert!(!typing.clear_remote());
    assert!(!typing.on_remote_timeout(armed));
}
