use super::*;

#[test]
fn registers_on_connect_with_known_identity() {
    let mut lifecycle = ConnectionLifecycle::new(Some(UserId::from("me")));
    lifecycle.on_connecting();
    assert_eq!(lifecycle.state(), ConnectionState::Connecting);

    let outcome = lifecycle.on_connected();
    assert_eq!(outcome.register, Some(UserId::from("me")));
    assert!(!outcome.is_reconnect);
    assert_eq!(lifecycle.on_connected(), ConnectedOutcome::default());
}

#[test]
fn reconnect_registers_again_with_same_identity() {
    let mut lifecycle = ConnectionLifecycle::new(Some(UserId::from("me")));
    let mut registrations = Vec::new();

    registrations.extend(lifecycle.on_connected().register);
    assert!(lifecycle.on_disconnected());
    assert!(!lifecycle.on_disconnected());
    let outcome = lifecycle.on_connected();
    assert!(outcome.is_reconnect);
    registrations.extend(outcome.register);

    assert_eq!(
        registrations,
        vec![UserId::from("me"), UserId::from("me")]
    );
}

#[test]
fn guest_registration_waits_for_identity() {
    let mut lifecycle = ConnectionLifecycle::new(None);
    assert_eq!(lifecycle.on_connected().register, None);
    assert_eq!(lifecycle.identity(), None);

    assert_eq!(
        lifecycle.resolve_identity(UserId::from("guest-1")),
        Some(UserId::from("guest-1"))
    );
    assert_eq!(lifecycle.resolve_identity(UserId::from("guest-1")), None);
}

#[test]
fn identity_resolved_while_offline_registers_on_next_connect() {
    let mut lifecycle = ConnectionLifecycle::new(None);
    assert_eq!(lifecycle.resolve_identity(UserId::from("guest-1")), None);
    assert_eq!(
        lifecycle.on_connected().register,
        Some(UserId::from("guest-1"))
    );
}
