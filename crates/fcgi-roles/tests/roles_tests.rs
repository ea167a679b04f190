//! Built-in role tests: each role runs against an in-memory connection and
//! the peer side inspects the records it produced.

use std::time::Duration;

use fcgi_protocol::{RecordType, RequestContext};
use fcgi_roles::authorizer::{self, AUTHORIZED_USERS_SERVICE, AuthorizedUsers};
use fcgi_roles::responder::{self, GREETING_SERVICE, Greeting};
use fcgi_roles::{RoleContext, RoleError, RoleFactory, RoleOutput, ServiceRegistry};
use fcgi_transport::Transceiver;
use tokio::io::duplex;

const TIMEOUT: Duration = Duration::from_secs(5);

fn request(params: &[(&str, &str)], body: &[u8]) -> RequestContext {
    let mut ctx = RequestContext::new();
    ctx.request_id = 1;
    ctx.role = 1;
    ctx.params = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ctx.stdin = body.to_vec();
    ctx
}

/// Run `factory` to completion and return (exit code, STDOUT text, record types seen).
async fn run_role(
    factory: &dyn RoleFactory,
    request: &RequestContext,
    services: &ServiceRegistry,
) -> (Result<i32, RoleError>, String, Vec<RecordType>) {
    let (client, server) = duplex(1 << 20);
    let mut tx = Transceiver::new(server, TIMEOUT);
    let mut peer = Transceiver::new(client, TIMEOUT);

    let outcome = {
        let ctx = RoleContext {
            request,
            output: RoleOutput::new(&mut tx, request.request_id),
            services,
        };
        let mut role = factory.build(ctx);
        match role.run_dyn().await {
            Ok(code) => role.flush_dyn(true).await.map(|_| code),
            Err(e) => Err(e),
        }
    };
    drop(tx);

    let mut stdout = Vec::new();
    let mut types = Vec::new();
    while let Ok(record) = peer.receive().await {
        if record.record_type == RecordType::Stdout {
            stdout.extend_from_slice(&record.content);
        }
        types.push(record.record_type);
    }
    (outcome, String::from_utf8(stdout).unwrap(), types)
}

// ─── Responder ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn echo_lists_sorted_params_and_body() {
    let req = request(&[("SCRIPT_NAME", "/x"), ("QUERY_STRING", "a=1")], b"hello");
    let services = ServiceRegistry::new();

    let (code, stdout, types) = run_role(&responder::factory, &req, &services).await;
    assert_eq!(code.unwrap(), 0);
    assert!(stdout.starts_with("Status: 200 OK\r\nContent-Type: text/plain"));

    let (_, body) = stdout.split_once("\r\n\r\n").unwrap();
    assert_eq!(body, "QUERY_STRING=a=1\nSCRIPT_NAME=/x\n\n5 byte body\nhello");
    assert_eq!(types.last(), Some(&RecordType::Stdout));
    assert!(!types.contains(&RecordType::Stderr));
}

#[tokio::test]
async fn echo_uses_injected_greeting() {
    let req = request(&[], b"");
    let mut services = ServiceRegistry::new();
    services.register(GREETING_SERVICE, Greeting("Hello from the pool".into()));

    let (_, stdout, _) = run_role(&responder::factory, &req, &services).await;
    let (_, body) = stdout.split_once("\r\n\r\n").unwrap();
    assert!(body.starts_with("Hello from the pool\n"));
}

#[tokio::test]
async fn large_output_is_chunked() {
    let big = vec![b'z'; 200_000];
    let req = request(&[], &big);
    let services = ServiceRegistry::new();

    let (code, stdout, types) = run_role(&responder::factory, &req, &services).await;
    assert_eq!(code.unwrap(), 0);
    assert!(stdout.ends_with(&"z".repeat(1000)));
    // Four data records (200 KiB + headers over 64 KiB chunks) and the terminator
    assert_eq!(types.len(), 5);
    assert!(types.iter().all(|t| *t == RecordType::Stdout));
}

// ─── Authorizer ─────────────────────────────────────────────────────────────

fn allow_list() -> ServiceRegistry {
    let mut services = ServiceRegistry::new();
    services.register(AUTHORIZED_USERS_SERVICE, AuthorizedUsers::new(["alice"]));
    services
}

#[tokio::test]
async fn authorizer_accepts_listed_user() {
    let req = request(&[("REMOTE_USER", "alice")], b"");
    let (code, stdout, _) = run_role(&authorizer::factory, &req, &allow_list()).await;
    assert_eq!(code.unwrap(), 0);
    assert_eq!(stdout, "Status: 200 OK\r\nVariable-AUTH_USER: alice\r\n\r\n");
}

#[tokio::test]
async fn authorizer_rejects_unknown_or_missing_user() {
    for params in [vec![("REMOTE_USER", "mallory")], vec![]] {
        let req = request(&params, b"");
        let (code, stdout, _) = run_role(&authorizer::factory, &req, &allow_list()).await;
        assert_eq!(code.unwrap(), 0);
        assert!(stdout.starts_with("Status: 403 Forbidden\r\n"));
    }
}

#[tokio::test]
async fn authorizer_without_allow_list_fails() {
    let req = request(&[("REMOTE_USER", "alice")], b"");
    let (code, _, _) = run_role(&authorizer::factory, &req, &ServiceRegistry::new()).await;
    assert!(matches!(code, Err(RoleError::MissingService(name)) if name == AUTHORIZED_USERS_SERVICE));
}
