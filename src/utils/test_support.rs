/// Tests that stand up a local mock server need a listening socket; some
/// sandboxes deny that outright. Returns true when the test should bail out
/// early instead of failing on the bind.
pub fn should_skip_httpmock() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(_probe) => false,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("localhost bind denied, skipping mock-server test");
            true
        }
        Err(err) => panic!("localhost probe failed unexpectedly: {err}"),
    }
}
