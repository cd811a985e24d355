use super::*;

#[test]
fn http_status_mapping() {
    assert_eq!(Failure::no_session("none").http_status(), 401);
    assert_eq!(Failure::reauth_required("expired").http_status(), 401);
    assert_eq!(Failure::denied("nope").http_status(), 403);
    assert_eq!(Failure::transport("down").http_status(), 503);
    assert_eq!(Failure::application("bad").http_status(), 502);
}

#[test]
fn display_uses_code_and_message() {
    let f = Failure::denied("manage_fees missing");
    assert_eq!(f.to_string(), "authorization_denied: manage_fees missing");
    assert_eq!(f.code_str(), "authorization_denied");
}

#[test]
fn login_kinds() {
    assert!(FailureKind::NoSession.requires_login());
    assert!(FailureKind::ReauthRequired.requires_login());
    assert!(!FailureKind::AuthorizationDenied.requires_login());
    assert!(!FailureKind::TransportError.requires_login());
}

#[test]
fn auth_error_classification() {
    let f: Failure = AuthError::ReauthRequired("refresh token expired".into()).into();
    assert_eq!(f.kind, FailureKind::ReauthRequired);
    assert_eq!(f.message(), "refresh token expired");

    let f: Failure = AuthError::NoSession.into();
    assert_eq!(f.kind, FailureKind::NoSession);
}

#[test]
fn transport_error_is_transport_failure() {
    let f: Failure = TransportError::Timeout("30s".into()).into();
    assert_eq!(f.kind, FailureKind::TransportError);
    assert!(f.message().contains("timed out"));
}

#[test]
fn failure_serializes_snake_case_kind() {
    let v = serde_json::to_value(Failure::no_session("x")).unwrap();
    assert_eq!(v["kind"], "no_session");
}
