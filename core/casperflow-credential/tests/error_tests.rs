use casperflow_credential::CredentialError;

#[test]
fn error_display_malformed_key() {
    let err = CredentialError::MalformedKey("unknown key prefix".into());
    let msg = format!("{err}");
    assert!(msg.contains("malformed API key"));
    assert!(msg.contains("unknown key prefix"));
}

#[test]
fn error_display_entropy() {
    let err = CredentialError::Entropy("no device".into());
    assert!(format!("{err}").contains("entropy"));
}

#[test]
fn error_is_debug() {
    let err = CredentialError::MalformedKey("x".into());
    let _ = format!("{err:?}");
}
